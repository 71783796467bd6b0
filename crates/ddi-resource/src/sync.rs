//! Process-wide critical section.
//!
//! Every DDI entry point takes the section for the whole logical operation (a lock, a blit, a
//! reconfiguration). The guard releases it on every exit path, unwinding included.

use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Default)]
pub struct CriticalSection<T> {
    inner: Mutex<T>,
}

impl<T> CriticalSection<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Mutex::new(value),
        }
    }

    /// Enters the section. A panic inside an earlier operation does not poison it: the state
    /// it protects is kept consistent by each operation's own error handling.
    pub fn enter(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    /// Runs `f` inside the section.
    pub fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let mut guard = self.enter();
        f(&mut guard)
    }

    pub fn into_inner(self) -> T {
        self.inner
            .into_inner()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[test]
    fn operations_from_many_threads_are_serialized() {
        let section = Arc::new(CriticalSection::new(Vec::new()));
        let workers: Vec<_> = (0..4)
            .map(|id| {
                let section = Arc::clone(&section);
                thread::spawn(move || {
                    for step in 0..100 {
                        section.with(|log: &mut Vec<(u32, u32)>| log.push((id, step)));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        let section = Arc::try_unwrap(section).unwrap();
        assert_eq!(section.into_inner().len(), 400);
    }

    #[test]
    fn section_survives_a_panicking_operation() {
        let section = Arc::new(CriticalSection::new(0u32));
        let clone = Arc::clone(&section);
        let _ = thread::spawn(move || {
            clone.with(|value| {
                *value = 7;
                panic!("operation failed");
            })
        })
        .join();
        assert_eq!(*section.enter(), 7);
    }
}
