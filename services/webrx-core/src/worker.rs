//! Shared broadcast workers with a listener-counted lifecycle
//!
//! The worker thread is created when the first listener registers and told
//! to stop when the last one leaves. Creation and teardown happen under one
//! mutex, so concurrent add/remove calls cannot double-start or double-stop.

use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use tracing::{debug, info};

/// Weak, ordered listener collection, safe to mutate while broadcasting
pub struct Listeners<C: ?Sized> {
    clients: Mutex<Vec<Weak<C>>>,
}

impl<C: ?Sized> Listeners<C> {
    fn new() -> Self {
        Self {
            clients: Mutex::new(Vec::new()),
        }
    }

    fn add(&self, client: &Arc<C>) {
        self.clients.lock().push(Arc::downgrade(client));
    }

    /// Remove `client`, returning how many live listeners remain
    fn remove(&self, client: &Arc<C>) -> usize {
        let target = Arc::downgrade(client);
        let mut clients = self.clients.lock();
        clients.retain(|c| !Weak::ptr_eq(c, &target) && c.strong_count() > 0);
        clients.len()
    }

    /// Live listeners in registration order; dead handles are pruned
    pub fn snapshot(&self) -> Vec<Arc<C>> {
        let mut clients = self.clients.lock();
        clients.retain(|c| c.strong_count() > 0);
        clients.iter().filter_map(Weak::upgrade).collect()
    }

    /// Call `f` for every live listener outside the lock
    pub fn broadcast(&self, mut f: impl FnMut(&C)) -> usize {
        let clients = self.snapshot();
        for client in &clients {
            f(client);
        }
        clients.len()
    }

    pub fn len(&self) -> usize {
        self.clients.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle passed to the worker's run function
pub struct WorkerContext<C: ?Sized> {
    pub listeners: Arc<Listeners<C>>,
    running: Arc<AtomicBool>,
}

impl<C: ?Sized> WorkerContext<C> {
    /// Checked once per loop iteration
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

type RunFn<C> = Arc<dyn Fn(WorkerContext<C>) + Send + Sync>;

struct ActiveWorker<C: ?Sized> {
    listeners: Arc<Listeners<C>>,
    running: Arc<AtomicBool>,
    thread: JoinHandle<()>,
}

/// Process-wide manager of one lazily created worker thread
pub struct SharedWorker<C: ?Sized> {
    name: String,
    run: RunFn<C>,
    active: Mutex<Option<ActiveWorker<C>>>,
    listener_count: AtomicUsize,
}

impl<C: ?Sized + Send + Sync + 'static> SharedWorker<C> {
    pub fn new<F>(name: &str, run: F) -> Self
    where
        F: Fn(WorkerContext<C>) + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            run: Arc::new(run),
            active: Mutex::new(None),
            listener_count: AtomicUsize::new(0),
        }
    }

    /// Register a listener, starting the worker if none is running
    pub fn add_client(&self, client: &Arc<C>) -> io::Result<()> {
        let mut active = self.active.lock();

        // A worker that ended on its own is replaced; its listeners carry over
        let worker = match active.take() {
            Some(worker) if worker.thread.is_finished() => {
                debug!("[{}] previous worker has exited", self.name);
                match self.spawn(worker.listeners.clone()) {
                    Ok(replacement) => replacement,
                    Err(e) => {
                        *active = Some(worker);
                        return Err(e);
                    }
                }
            }
            Some(worker) => worker,
            None => self.spawn(Arc::new(Listeners::new()))?,
        };
        worker.listeners.add(client);
        self.listener_count
            .store(worker.listeners.len(), Ordering::SeqCst);
        *active = Some(worker);
        Ok(())
    }

    /// Unregister a listener; removing the last one shuts the worker down
    pub fn remove_client(&self, client: &Arc<C>) {
        let mut active = self.active.lock();
        let Some(worker) = active.as_ref() else {
            return;
        };
        let remaining = worker.listeners.remove(client);
        self.listener_count.store(remaining, Ordering::SeqCst);
        if remaining == 0 {
            Self::shutdown_locked(&self.name, &mut active);
        }
    }

    /// Clear the shared reference and flag the loop to exit
    pub fn shutdown(&self) {
        let mut active = self.active.lock();
        self.listener_count.store(0, Ordering::SeqCst);
        Self::shutdown_locked(&self.name, &mut active);
    }

    /// True while a worker thread exists and has not returned
    pub fn is_running(&self) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|w| !w.thread.is_finished())
    }

    pub fn listener_count(&self) -> usize {
        self.listener_count.load(Ordering::SeqCst)
    }

    fn spawn(&self, listeners: Arc<Listeners<C>>) -> io::Result<ActiveWorker<C>> {
        let running = Arc::new(AtomicBool::new(true));
        let context = WorkerContext {
            listeners: listeners.clone(),
            running: running.clone(),
        };
        let run = self.run.clone();
        let thread = thread::Builder::new()
            .name(self.name.clone())
            .spawn(move || run(context))?;
        info!("[{}] worker started", self.name);
        Ok(ActiveWorker {
            listeners,
            running,
            thread,
        })
    }

    fn shutdown_locked(name: &str, active: &mut Option<ActiveWorker<C>>) {
        if let Some(worker) = active.take() {
            info!("[{}] shutting down", name);
            worker.running.store(false, Ordering::SeqCst);
            // Detached: the loop may be blocked in a read until it returns
        }
    }
}

impl<C: ?Sized> Drop for SharedWorker<C> {
    fn drop(&mut self) {
        if let Some(worker) = self.active.get_mut().take() {
            worker.running.store(false, Ordering::SeqCst);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    trait Sink: Send + Sync {
        fn push(&self, value: u32);
    }

    #[derive(Default)]
    struct Recorder(Mutex<Vec<u32>>);

    impl Sink for Recorder {
        fn push(&self, value: u32) {
            self.0.lock().push(value);
        }
    }

    fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline {
            if cond() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        false
    }

    fn counting_worker(exits: Arc<AtomicUsize>) -> SharedWorker<dyn Sink> {
        SharedWorker::new("test-worker", move |ctx: WorkerContext<dyn Sink>| {
            let mut n = 0;
            while ctx.is_running() {
                ctx.listeners.broadcast(|s| s.push(n));
                n += 1;
                thread::sleep(Duration::from_millis(5));
            }
            exits.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_lifecycle_follows_listeners() {
        let exits = Arc::new(AtomicUsize::new(0));
        let worker = counting_worker(exits.clone());
        assert!(!worker.is_running());

        let a: Arc<dyn Sink> = Arc::new(Recorder::default());
        let b: Arc<dyn Sink> = Arc::new(Recorder::default());
        worker.add_client(&a).unwrap();
        worker.add_client(&b).unwrap();
        assert!(worker.is_running());
        assert_eq!(worker.listener_count(), 2);

        worker.remove_client(&a);
        assert!(worker.is_running());
        assert_eq!(worker.listener_count(), 1);

        worker.remove_client(&b);
        assert!(!worker.is_running());
        assert!(wait_until(|| exits.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_broadcast_reaches_all_listeners() {
        let worker = counting_worker(Arc::new(AtomicUsize::new(0)));
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let a_dyn: Arc<dyn Sink> = a.clone();
        let b_dyn: Arc<dyn Sink> = b.clone();
        worker.add_client(&a_dyn).unwrap();
        worker.add_client(&b_dyn).unwrap();

        assert!(wait_until(|| a.0.lock().len() > 3 && b.0.lock().len() > 3));
        worker.shutdown();
    }

    #[test]
    fn test_restart_after_teardown() {
        let exits = Arc::new(AtomicUsize::new(0));
        let worker = counting_worker(exits.clone());
        let a: Arc<dyn Sink> = Arc::new(Recorder::default());

        worker.add_client(&a).unwrap();
        worker.remove_client(&a);
        worker.add_client(&a).unwrap();
        assert!(worker.is_running());
        assert!(wait_until(|| exits.load(Ordering::SeqCst) == 1));

        worker.remove_client(&a);
        assert!(wait_until(|| exits.load(Ordering::SeqCst) == 2));
    }

    fn one_shot_worker() -> SharedWorker<dyn Sink> {
        SharedWorker::new("one-shot", |ctx: WorkerContext<dyn Sink>| {
            let count = ctx.listeners.len() as u32;
            ctx.listeners.broadcast(|s| s.push(count));
        })
    }

    #[test]
    fn test_finished_worker_is_not_running() {
        let worker = one_shot_worker();
        let a: Arc<dyn Sink> = Arc::new(Recorder::default());
        worker.add_client(&a).unwrap();

        assert!(wait_until(|| !worker.is_running()));
        assert_eq!(worker.listener_count(), 1);
    }

    #[test]
    fn test_replacement_keeps_existing_listeners() {
        let worker = one_shot_worker();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let a_dyn: Arc<dyn Sink> = a.clone();
        let b_dyn: Arc<dyn Sink> = b.clone();

        worker.add_client(&a_dyn).unwrap();
        assert!(wait_until(|| !worker.is_running()));

        worker.add_client(&b_dyn).unwrap();
        assert_eq!(worker.listener_count(), 2);
        assert!(wait_until(|| !b.0.lock().is_empty()));
        assert_eq!(*b.0.lock(), vec![2]);
        assert_eq!(a.0.lock().len(), 2);

        worker.remove_client(&b_dyn);
        assert_eq!(worker.listener_count(), 1);
        worker.remove_client(&a_dyn);
        assert_eq!(worker.listener_count(), 0);
    }

    #[test]
    fn test_dropped_listener_is_pruned() {
        let listeners: Listeners<dyn Sink> = Listeners::new();
        let a: Arc<dyn Sink> = Arc::new(Recorder::default());
        let b: Arc<dyn Sink> = Arc::new(Recorder::default());
        listeners.add(&a);
        listeners.add(&b);

        drop(a);
        assert_eq!(listeners.broadcast(|s| s.push(1)), 1);
        assert_eq!(listeners.len(), 1);
    }
}
