use alloc::sync::Arc;
use core::fmt::Debug;

use capture_interop::compute::ImageDesc;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use super::ContextId;

/// What a memory object holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MemoryKind {
    /// Untyped bytes.
    Buffer,
    /// Tightly packed pixels.
    Image(ImageDesc),
}

/// A buffer or image in host memory.
#[derive(Clone)]
pub struct Memory(Arc<MemoryObject>);

struct MemoryObject {
    id: u64,
    context: ContextId,
    kind: MemoryKind,
    data: RwLock<Box<[u8]>>,
}

impl Memory {
    pub(crate) fn buffer(id: u64, context: ContextId, size: usize) -> Self {
        Self::new(id, context, MemoryKind::Buffer, size)
    }

    pub(crate) fn image(id: u64, context: ContextId, desc: ImageDesc) -> Self {
        let size = desc.size[0] as usize * desc.size[1] as usize * desc.format.bytes_per_pixel();
        Self::new(id, context, MemoryKind::Image(desc), size)
    }

    fn new(id: u64, context: ContextId, kind: MemoryKind, size: usize) -> Self {
        Self(Arc::new(MemoryObject {
            id,
            context,
            kind,
            data: RwLock::new(vec![0; size].into_boxed_slice()),
        }))
    }

    /// The id of the object, unique within a [`SoftwareCompute`](crate::SoftwareCompute).
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// The context the object was created in.
    pub fn context(&self) -> ContextId {
        self.0.context
    }

    /// What the object holds.
    pub fn kind(&self) -> MemoryKind {
        self.0.kind
    }

    /// The image description, if the object is an image.
    pub fn desc(&self) -> Option<ImageDesc> {
        match self.0.kind {
            MemoryKind::Image(desc) => Some(desc),
            MemoryKind::Buffer => None,
        }
    }

    /// The size of the object in bytes.
    pub fn len(&self) -> usize {
        self.0.data.read().len()
    }

    /// If the object holds no bytes.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.0.data.read()
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.0.data.write()
    }
}

impl PartialEq for Memory {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Memory {}

impl Debug for Memory {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Memory")
            .field("id", &self.0.id)
            .field("kind", &self.0.kind)
            .finish()
    }
}
