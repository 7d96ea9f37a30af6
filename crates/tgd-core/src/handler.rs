use std::{future::Future, pin::Pin, sync::Arc};

use crate::event::{Event, EventKind};

pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Callback consuming one event by value.
///
/// Cloning is cheap (shared `Arc`). Side effects such as replies go through
/// whatever client the closure captured at registration time.
pub struct Handler<E> {
    f: Arc<dyn Fn(E) -> HandlerFuture + Send + Sync>,
}

impl<E> Clone for Handler<E> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<E> std::fmt::Debug for Handler<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Handler")
    }
}

impl<E: Send + 'static> Handler<E> {
    /// Async handler.
    pub fn new<F, Fut>(f: F) -> Self
    where
        F: Fn(E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self {
            f: Arc::new(move |e: E| -> HandlerFuture { Box::pin(f(e)) }),
        }
    }

    /// Plain closure that runs inline on a worker. Must not block.
    pub fn sync<F>(f: F) -> Self
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        Self {
            f: Arc::new(move |e: E| -> HandlerFuture {
                f(e);
                Box::pin(std::future::ready(()))
            }),
        }
    }

    /// Closure that may block; runs on tokio's blocking pool.
    ///
    /// A panic inside `f` is re-raised on the worker so it is reported the
    /// same way as a panic in an async handler.
    pub fn blocking<F>(f: F) -> Self
    where
        F: Fn(E) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Self {
            f: Arc::new(move |e: E| -> HandlerFuture {
                let f = f.clone();
                Box::pin(async move {
                    if let Err(err) = tokio::task::spawn_blocking(move || f(e)).await {
                        if err.is_panic() {
                            std::panic::resume_unwind(err.into_panic());
                        }
                    }
                })
            }),
        }
    }

    pub fn call(&self, event: E) -> HandlerFuture {
        (self.f)(event)
    }
}

impl<E: EventKind> Handler<E> {
    /// Lift a typed handler to the `Event` level. Events of another category
    /// are ignored.
    pub(crate) fn erase(self) -> Handler<Event> {
        let inner = self.f;
        Handler {
            f: Arc::new(move |ev: Event| -> HandlerFuture {
                match E::from_event(ev) {
                    Some(e) => inner(e),
                    None => Box::pin(std::future::ready(())),
                }
            }),
        }
    }
}

/// Predicate over an event; `false` keeps a sequence on its current step.
pub struct Guard<E> {
    f: Arc<dyn Fn(&E) -> bool + Send + Sync>,
}

impl<E> Clone for Guard<E> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<E> std::fmt::Debug for Guard<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Guard")
    }
}

impl<E: 'static> Guard<E> {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&E) -> bool + Send + Sync + 'static,
    {
        Self { f: Arc::new(f) }
    }

    pub fn check(&self, event: &E) -> bool {
        (self.f)(event)
    }
}

impl<E: EventKind> Guard<E> {
    pub(crate) fn erase(self) -> Guard<Event> {
        let inner = self.f;
        Guard {
            f: Arc::new(move |ev: &Event| E::from_event_ref(ev).is_some_and(|e| inner(e))),
        }
    }
}
