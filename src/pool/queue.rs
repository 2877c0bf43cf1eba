//! 优先级等待队列
//!
//! 连接池饱和时，获取请求在这里排队。按优先级分三档，同档内先到先得。
//! 出队与投递在同一次加锁内完成，超时的等待者加锁后移除自己的票据，
//! 因此一个句柄要么被某个等待者拿到，要么退还给调用方，不会丢失

use super::types::Priority;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::time::Instant;

struct Ticket<T> {
    id: u64,
    enqueued_at: Instant,
    sender: oneshot::Sender<T>,
}

struct QueueInner<T> {
    tiers: [VecDeque<Ticket<T>>; 3],
    next_id: u64,
}

impl<T> QueueInner<T> {
    fn remove(&mut self, priority: Priority, id: u64) -> bool {
        let tier = &mut self.tiers[priority.index()];
        match tier.iter().position(|t| t.id == id) {
            Some(pos) => {
                tier.remove(pos);
                true
            }
            None => false,
        }
    }

    fn len(&self) -> usize {
        self.tiers.iter().map(VecDeque::len).sum()
    }
}

/// 等待失败原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// 超时
    Timeout { waited: Duration },
    /// 队列被清空（连接池关闭）
    Rejected,
}

/// 优先级等待队列
pub struct WaitQueue<T> {
    inner: Arc<Mutex<QueueInner<T>>>,
}

impl<T> Clone for WaitQueue<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Default for WaitQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> WaitQueue<T> {
    /// 创建空队列
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(QueueInner {
                tiers: [VecDeque::new(), VecDeque::new(), VecDeque::new()],
                next_id: 0,
            })),
        }
    }

    /// 登记一个等待者
    ///
    /// 登记立即生效，返回的 `Waiter` 被 await 之前就可能已收到句柄
    pub fn enqueue(&self, priority: Priority, timeout: Duration) -> Waiter<T> {
        let (sender, receiver) = oneshot::channel();
        let enqueued_at = Instant::now();
        let id = {
            let mut inner = self.inner.lock();
            let id = inner.next_id;
            inner.next_id += 1;
            inner.tiers[priority.index()].push_back(Ticket {
                id,
                enqueued_at,
                sender,
            });
            id
        };

        Waiter {
            id,
            priority,
            timeout,
            enqueued_at,
            receiver,
            queue: Arc::clone(&self.inner),
        }
    }

    /// 把句柄交给优先级最高、最早登记的等待者
    ///
    /// 没有等待者（或等待者都已放弃）时原样退还
    pub fn service_next(&self, mut item: T) -> Option<T> {
        let mut inner = self.inner.lock();
        for tier in inner.tiers.iter_mut() {
            while let Some(ticket) = tier.pop_front() {
                match ticket.sender.send(item) {
                    Ok(()) => return None,
                    // 接收端已丢弃，跳过
                    Err(returned) => item = returned,
                }
            }
        }
        Some(item)
    }

    /// 等待者总数
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// 是否没有等待者
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 各优先级的等待者数量，顺序为 High、Normal、Low
    pub fn len_by_priority(&self) -> [usize; 3] {
        let inner = self.inner.lock();
        [inner.tiers[0].len(), inner.tiers[1].len(), inner.tiers[2].len()]
    }

    /// 最早登记的等待者已等待的时长
    pub fn oldest_wait(&self) -> Option<Duration> {
        let inner = self.inner.lock();
        inner
            .tiers
            .iter()
            .filter_map(|tier| tier.front().map(|t| t.enqueued_at))
            .min()
            .map(|at| at.elapsed())
    }

    /// 拒绝所有等待者，返回被拒绝的数量
    pub fn drain(&self) -> usize {
        let mut inner = self.inner.lock();
        let count = inner.len();
        for tier in inner.tiers.iter_mut() {
            tier.clear();
        }
        count
    }
}

/// 已登记的等待者
pub struct Waiter<T> {
    id: u64,
    priority: Priority,
    timeout: Duration,
    enqueued_at: Instant,
    receiver: oneshot::Receiver<T>,
    queue: Arc<Mutex<QueueInner<T>>>,
}

impl<T> Waiter<T> {
    /// 优先级
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// 等待句柄送达或超时
    pub async fn wait(mut self) -> Result<T, WaitError> {
        match tokio::time::timeout(self.timeout, &mut self.receiver).await {
            Ok(Ok(item)) => Ok(item),
            Ok(Err(_)) => Err(WaitError::Rejected),
            Err(_) => {
                let removed = self.queue.lock().remove(self.priority, self.id);
                if removed {
                    return Err(WaitError::Timeout {
                        waited: self.enqueued_at.elapsed(),
                    });
                }
                // 票据已不在队列中：要么句柄已经送达，要么队列被清空
                match self.receiver.try_recv() {
                    Ok(item) => Ok(item),
                    Err(oneshot::error::TryRecvError::Empty) => Err(WaitError::Timeout {
                        waited: self.enqueued_at.elapsed(),
                    }),
                    Err(oneshot::error::TryRecvError::Closed) => Err(WaitError::Rejected),
                }
            }
        }
    }
}

impl<T> Drop for Waiter<T> {
    /// 调用方放弃等待（future 被取消）时，票据随之出队，不再计入队列长度
    fn drop(&mut self) {
        self.queue.lock().remove(self.priority, self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_priority_then_fifo() {
        let queue: WaitQueue<u32> = WaitQueue::new();
        let timeout = Duration::from_secs(5);
        let low = queue.enqueue(Priority::Low, timeout);
        let normal_a = queue.enqueue(Priority::Normal, timeout);
        let high = queue.enqueue(Priority::High, timeout);
        let normal_b = queue.enqueue(Priority::Normal, timeout);
        assert_eq!(queue.len_by_priority(), [1, 2, 1]);

        for item in 1..=4 {
            assert!(queue.service_next(item).is_none());
        }

        assert_eq!(high.wait().await, Ok(1));
        assert_eq!(normal_a.wait().await, Ok(2));
        assert_eq!(normal_b.wait().await, Ok(3));
        assert_eq!(low.wait().await, Ok(4));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_empty_queue_gives_item_back() {
        let queue: WaitQueue<&str> = WaitQueue::new();
        assert_eq!(queue.service_next("conn"), Some("conn"));
    }

    #[tokio::test]
    async fn test_dropped_waiter_is_skipped() {
        let queue: WaitQueue<u32> = WaitQueue::new();
        let gone = queue.enqueue(Priority::High, Duration::from_secs(5));
        let alive = queue.enqueue(Priority::Low, Duration::from_secs(5));
        drop(gone);

        assert!(queue.service_next(7).is_none());
        assert_eq!(alive.wait().await, Ok(7));
    }

    #[tokio::test]
    async fn test_cancelled_waiter_leaves_queue() {
        let queue: WaitQueue<u32> = WaitQueue::new();
        let kept = queue.enqueue(Priority::Normal, Duration::from_secs(5));
        {
            // 等待中的 future 被取消
            let mut cancelled = tokio_test::task::spawn(queue.enqueue(Priority::High, Duration::from_secs(5)).wait());
            tokio_test::assert_pending!(cancelled.poll());
            assert_eq!(queue.len(), 2);
        }

        assert_eq!(queue.len(), 1);
        assert_eq!(queue.len_by_priority(), [0, 1, 0]);
        assert!(queue.service_next(9).is_none());
        assert_eq!(kept.wait().await, Ok(9));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn test_waiter_stays_pending_until_served() {
        let queue: WaitQueue<u32> = WaitQueue::new();
        let mut wait = tokio_test::task::spawn(queue.enqueue(Priority::Normal, Duration::from_secs(5)).wait());
        tokio_test::assert_pending!(wait.poll());

        assert!(queue.service_next(5).is_none());
        assert!(wait.is_woken());
        tokio_test::assert_ready_eq!(wait.poll(), Ok(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timed_out_waiter_removes_itself() {
        let queue: WaitQueue<u32> = WaitQueue::new();
        let waiter = queue.enqueue(Priority::Normal, Duration::from_millis(100));

        let result = waiter.wait().await;
        assert!(matches!(result, Err(WaitError::Timeout { waited }) if waited >= Duration::from_millis(100)));
        assert!(queue.is_empty());
        // 超时的等待者不会再被匹配
        assert_eq!(queue.service_next(1), Some(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_item_delivered_before_wait_is_kept() {
        let queue: WaitQueue<u32> = WaitQueue::new();
        let waiter = queue.enqueue(Priority::Normal, Duration::from_millis(10));
        assert!(queue.service_next(42).is_none());

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(waiter.wait().await, Ok(42));
    }

    #[tokio::test]
    async fn test_drain_rejects_everyone() {
        let queue: WaitQueue<u32> = WaitQueue::new();
        let a = queue.enqueue(Priority::High, Duration::from_secs(5));
        let b = queue.enqueue(Priority::Low, Duration::from_secs(5));
        assert!(queue.oldest_wait().is_some());

        assert_eq!(queue.drain(), 2);
        assert_eq!(a.wait().await, Err(WaitError::Rejected));
        assert_eq!(b.wait().await, Err(WaitError::Rejected));
        assert!(queue.oldest_wait().is_none());
    }
}
