//! 后台任务登记：组件销毁时统一取消，避免销毁后仍有任务修改状态

use std::future::Future;
use std::sync::Mutex;
use tokio::task::{AbortHandle, JoinHandle};

#[derive(Default)]
pub struct TaskSet {
    handles: Mutex<Vec<AbortHandle>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// 在当前 tokio 运行时中启动任务并登记
    pub fn spawn<F>(&self, fut: F) -> JoinHandle<F::Output>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        let handle = tokio::spawn(fut);
        if let Ok(mut handles) = self.handles.lock() {
            handles.retain(|h| !h.is_finished());
            handles.push(handle.abort_handle());
        }
        handle
    }

    pub fn abort_all(&self) {
        if let Ok(mut handles) = self.handles.lock() {
            for h in handles.drain(..) {
                h.abort();
            }
        }
    }

    /// 仍在运行的任务数
    pub fn active(&self) -> usize {
        self.handles
            .lock()
            .map(|handles| handles.iter().filter(|h| !h.is_finished()).count())
            .unwrap_or(0)
    }
}

impl Drop for TaskSet {
    fn drop(&mut self) {
        self.abort_all();
    }
}
