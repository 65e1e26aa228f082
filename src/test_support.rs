//! Test-only polling helpers, compiled for `#[cfg(test)]` builds only.
//!
//! Grounded on the teacher's `utils::poll`: a noop waker and manual `Pin`,
//! generalised here from `Future<Output = ()>` to any output type so it can
//! drive the futures built in [`crate::interop`]'s tests without a real
//! async runtime.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Polls `future` exactly once with a waker that does nothing when woken,
/// pinning it to the stack for the call. Callers that need to observe a
/// wake-and-repoll cycle call this more than once.
pub(crate) fn poll_once<T>(future: &mut impl Future<Output = T>) -> Poll<T> {
    let waker = noop_waker::noop_waker();
    let mut context = Context::from_waker(&waker);

    // Safety: `future` is not moved out of after this point; it is dropped
    // in place along with the `&mut` borrow that produced this pin.
    let future = unsafe { Pin::new_unchecked(future) };

    future.poll(&mut context)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct YieldOnce {
        yielded: bool,
    }

    impl Future for YieldOnce {
        type Output = &'static str;

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            if self.yielded {
                return Poll::Ready("done");
            }
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    #[test]
    fn poll_once_drives_a_single_step() {
        let mut future = YieldOnce { yielded: false };
        assert_eq!(poll_once(&mut future), Poll::Pending);
        assert_eq!(poll_once(&mut future), Poll::Ready("done"));
    }
}
