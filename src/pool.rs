//! Bounded sets of parallel workers with an explicit join barrier.

use anyhow::{Context, Result, anyhow};
use log::debug;
use std::process::{Child, Command, Stdio};
use std::thread::{self, Scope, ScopedJoinHandle};

/// Scoped worker threads. Workers may borrow from the enclosing scope.
pub struct ThreadPool<'scope, 'env, T> {
    scope: &'scope Scope<'scope, 'env>,
    handles: Vec<ScopedJoinHandle<'scope, Result<T>>>,
}

impl<'scope, 'env, T: Send + 'scope> ThreadPool<'scope, 'env, T> {
    pub fn new(scope: &'scope Scope<'scope, 'env>) -> Self {
        ThreadPool {
            scope,
            handles: Vec::new(),
        }
    }

    pub fn spawn<F>(&mut self, name: String, f: F) -> Result<()>
    where
        F: FnOnce() -> Result<T> + Send + 'scope,
    {
        let handle = thread::Builder::new()
            .name(name.clone())
            .spawn_scoped(self.scope, f)
            .with_context(|| format!("spawn thread {name}"))?;
        self.handles.push(handle);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    /// Blocks until every worker has finished. Fails if any worker failed or panicked,
    /// but only after all of them are joined.
    pub fn join(self) -> Result<Vec<T>> {
        let mut results = Vec::with_capacity(self.handles.len());
        let mut failure = None;
        for handle in self.handles {
            match handle.join() {
                Ok(Ok(v)) => results.push(v),
                Ok(Err(e)) => {
                    failure.get_or_insert(e);
                }
                Err(_) => {
                    failure.get_or_insert(anyhow!("worker thread panicked"));
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(results),
        }
    }
}

/// Child processes whose stdout is collected on join.
#[derive(Default)]
pub struct ProcessPool {
    children: Vec<Child>,
}

impl ProcessPool {
    pub fn spawn(&mut self, mut cmd: Command) -> Result<()> {
        cmd.stdin(Stdio::null()).stdout(Stdio::piped());
        let child = cmd
            .spawn()
            .with_context(|| format!("spawn worker process {:?}", cmd.get_program()))?;
        debug!("spawned worker process {}", child.id());
        self.children.push(child);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.children.len()
    }

    /// Waits for every child and returns their stdout in spawn order.
    /// Any non-zero exit fails the whole pool once all children are reaped.
    pub fn join(mut self) -> Result<Vec<Vec<u8>>> {
        let children = std::mem::take(&mut self.children);
        let mut outputs = Vec::with_capacity(children.len());
        let mut failure = None;
        for child in children {
            let pid = child.id();
            match child.wait_with_output() {
                Ok(out) if out.status.success() => outputs.push(out.stdout),
                Ok(out) => {
                    failure.get_or_insert(anyhow!("worker process {pid} exited with {}", out.status));
                }
                Err(e) => {
                    failure.get_or_insert(anyhow!(e).context(format!("wait for worker process {pid}")));
                }
            }
        }
        match failure {
            Some(e) => Err(e),
            None => Ok(outputs),
        }
    }
}

impl Drop for ProcessPool {
    fn drop(&mut self) {
        for child in &mut self.children {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}
