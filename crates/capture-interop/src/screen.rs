use core::{
    fmt::{self, Display},
    hash::{Hash, Hasher},
};

/// Identifies a graphics adapter, e.g. a packed adapter LUID.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AdapterId(pub u64);

impl Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// A display output that can be captured.
///
/// A screen is identified by its adapter and output name only, the geometry is informational and
/// is ignored by equality and hashing.
#[derive(Clone, Debug)]
pub struct Screen {
    adapter: AdapterId,
    output: String,
    size: [u32; 2],
    origin: [i32; 2],
}

impl Screen {
    /// Create a new screen.
    pub fn new<S: Into<String>>(adapter: AdapterId, output: S, size: [u32; 2]) -> Self {
        Self {
            adapter,
            output: output.into(),
            size,
            origin: [0, 0],
        }
    }

    /// Sets the desktop coordinates of the screen's top-left corner.
    #[must_use]
    pub fn with_origin(mut self, origin: [i32; 2]) -> Self {
        self.origin = origin;
        self
    }

    /// The adapter the output is connected to.
    pub fn adapter(&self) -> AdapterId {
        self.adapter
    }

    /// The output's name, e.g. `\\.\DISPLAY1`.
    pub fn output(&self) -> &str {
        &self.output
    }

    /// The size of the output when it was enumerated.
    pub fn size(&self) -> [u32; 2] {
        self.size
    }

    /// The desktop coordinates of the output's top-left corner.
    pub fn origin(&self) -> [i32; 2] {
        self.origin
    }
}

impl PartialEq for Screen {
    fn eq(&self, other: &Self) -> bool {
        self.adapter == other.adapter && self.output == other.output
    }
}

impl Eq for Screen {}

impl Hash for Screen {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.adapter.hash(state);
        self.output.hash(state);
    }
}

impl Display for Screen {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} on adapter {}", self.output, self.adapter)
    }
}
