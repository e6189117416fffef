use core::ops::Deref;

/// A COM interface that may be moved to and shared with other threads.
///
/// Devices are free threaded. Device contexts are not and are always wrapped in a `Mutex`.
#[derive(Clone)]
pub(crate) struct SendCom<T>(pub T);

unsafe impl<T> Send for SendCom<T> {}
unsafe impl<T> Sync for SendCom<T> {}

impl<T> Deref for SendCom<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
