//! Runs one component's event loop on its own thread.
//!
//! Each long-lived component gets a current-thread runtime, so everything it
//! does happens serially in arrival order.

use std::future::Future;
use std::thread;

pub struct Executor;

impl Executor {
    /// Blocks the calling thread until `task` completes.
    pub fn run<T>(task: impl Future<Output = T>) -> T {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .expect("failed to build current-thread runtime");
        runtime.block_on(task)
    }

    /// Spawns a named thread that drives `make_task()` to completion.
    pub fn spawn<F, Fut>(name: &str, make_task: F) -> thread::JoinHandle<()>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()>,
    {
        let thread_name = name.to_string();
        thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                Self::run(make_task());
                tracing::debug!("{thread_name} exited");
            })
            .expect("failed to spawn actor thread")
    }
}

#[cfg(test)]
mod tests {
    use std::future;
    use std::pin::Pin;
    use std::task::{Context, Poll};
    use std::time::Duration;

    use super::*;

    #[derive(Default)]
    struct PendingThenReady(bool);

    impl Future for PendingThenReady {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
            if self.0 {
                return Poll::Ready(());
            }
            self.0 = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }

    #[test]
    fn executor_runs() {
        Executor::run(future::ready(()));
        Executor::run(PendingThenReady::default());

        let mut x = 0;
        Executor::run(async {
            x += 1;
            PendingThenReady::default().await;
            x += 1;
        });
        assert_eq!(2, x);
    }

    #[test]
    fn channel_works_across_threads() {
        use tokio::sync::mpsc;

        let (tx, mut rx) = mpsc::unbounded_channel();

        thread::spawn(move || {
            thread::sleep(Duration::from_millis(25));
            _ = tx.send(());
            _ = tx.send(());
            drop(tx);
        });

        let mut msgs = 0;
        Executor::run(async {
            while let Some(_msg) = rx.recv().await {
                msgs += 1;
                PendingThenReady::default().await;
            }
        });

        assert_eq!(2, msgs);
    }

    #[test]
    fn spawned_thread_carries_name() {
        let (tx, rx) = std::sync::mpsc::channel();
        Executor::spawn("named-actor", move || async move {
            _ = tx.send(thread::current().name().map(str::to_string));
        })
        .join()
        .unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("named-actor"));
    }
}
