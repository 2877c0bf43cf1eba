//! 连接池核心
//!
//! 连接映射、可用列表与等待队列构成同一个临界区，由一把 `parking_lot::Mutex`
//! 保护，持锁期间不 await。加锁顺序固定为：连接池状态 → 等待队列。
//! 登记等待者也在持有状态锁时完成，归还连接时不会错过刚登记的等待者

use super::monitor::spawn_monitor;
use super::queue::{WaitError, WaitQueue};
use super::types::{
    ConnectionInfo, ConnectionState, ConnectionStatus, ConnectionType, PoolCounters, PoolMetrics,
    PoolStatus, Priority,
};
use crate::adapter::{ConnectionFactory, EngineConnection, EngineError};
use crate::config::{CircuitBreakerConfig, PoolConfig};
use crate::error::{GuardError, GuardResult};
use crate::events::{DatabaseEvent, DatabaseEventKind, EventSink};
use crate::resilience::{
    classify, CircuitBreaker, ErrorCategory, OperationContext, RetryConfig, RetryEngine,
};
use crate::types::{DataValue, ExecuteResult, Row};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use rat_logger::{debug, error, info, warn};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

pub(super) struct IdleConnection {
    pub id: u64,
    pub conn: Box<dyn EngineConnection>,
    pub idle_since: Instant,
}

pub(super) struct PoolState {
    pub connections: HashMap<u64, ConnectionState>,
    pub available: VecDeque<IdleConnection>,
    pub pending_creates: u32,
}

pub(crate) struct PoolInner {
    pub(super) config: PoolConfig,
    factory: Arc<dyn ConnectionFactory>,
    pub(super) state: Mutex<PoolState>,
    pub(super) queue: WaitQueue<PooledConnection>,
    breaker: CircuitBreaker,
    retry: RetryEngine,
    events: Arc<dyn EventSink>,
    pub(super) counters: PoolCounters,
    next_id: AtomicU64,
    shutting_down: AtomicBool,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// 新建连接的名额预留
///
/// 创建过程被取消或失败时，Drop 负责归还名额
struct CreateReservation<'a> {
    pool: &'a PoolInner,
    armed: bool,
}

impl<'a> CreateReservation<'a> {
    fn new(pool: &'a PoolInner) -> Self {
        Self { pool, armed: true }
    }

    fn commit(mut self, state: &mut PoolState) {
        state.pending_creates = state.pending_creates.saturating_sub(1);
        self.armed = false;
    }
}

impl Drop for CreateReservation<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut state = self.pool.state.lock();
            state.pending_creates = state.pending_creates.saturating_sub(1);
        }
    }
}

enum Checkout<'a> {
    Ready(PooledConnection),
    Create(CreateReservation<'a>),
    Wait(super::queue::Waiter<PooledConnection>),
}

impl PoolInner {
    pub(super) fn emit(&self, event: DatabaseEvent) {
        self.events.emit(event);
    }

    pub(super) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    pub(super) fn status(&self) -> PoolStatus {
        let state = self.state.lock();
        let total = state.connections.len() as u32;
        let available = state.available.len() as u32;
        PoolStatus {
            available,
            in_use: total.saturating_sub(available),
            total,
            pending_creates: state.pending_creates,
            max: self.config.max_connections,
            queued: self.queue.len(),
        }
    }

    async fn acquire(
        self: &Arc<Self>,
        connection_type: ConnectionType,
        priority: Priority,
        context: &OperationContext,
    ) -> GuardResult<PooledConnection> {
        if self.is_shutting_down() {
            return Err(GuardError::PoolShuttingDown);
        }
        if !self.breaker.can_execute() {
            PoolCounters::incr(&self.counters.checkout_failures);
            let remaining_ms =
                u64::try_from(self.breaker.remaining_open_time().as_millis()).unwrap_or(u64::MAX);
            return Err(GuardError::CircuitOpen { remaining_ms });
        }

        let started = Instant::now();
        let checkout = {
            let mut state = self.state.lock();
            if let Some(idle) = state.available.pop_back() {
                if let Some(record) = state.connections.get_mut(&idle.id) {
                    record.activate(Some(connection_type));
                }
                Checkout::Ready(PooledConnection::new(idle.id, idle.conn, Arc::clone(self)))
            } else if state.connections.len() as u32 + state.pending_creates
                < self.config.max_connections
            {
                state.pending_creates += 1;
                Checkout::Create(CreateReservation::new(self))
            } else {
                Checkout::Wait(self.queue.enqueue(priority, self.config.connection_timeout))
            }
        };

        let conn = match checkout {
            Checkout::Ready(conn) => conn,
            Checkout::Create(reservation) => {
                match self.create_connection(reservation, connection_type, context).await {
                    Ok(conn) => conn,
                    Err(err) => {
                        PoolCounters::incr(&self.counters.checkout_failures);
                        return Err(err);
                    }
                }
            }
            Checkout::Wait(waiter) => {
                PoolCounters::incr(&self.counters.queue_waits);
                debug!(
                    "连接池已满，请求进入等待队列: 操作={}, 优先级={:?}",
                    context.operation,
                    waiter.priority()
                );
                match waiter.wait().await {
                    Ok(conn) => {
                        if let Some(record) = self.state.lock().connections.get_mut(&conn.id) {
                            record.connection_type = connection_type;
                        }
                        conn
                    }
                    Err(WaitError::Timeout { waited }) => {
                        PoolCounters::incr(&self.counters.timeouts);
                        PoolCounters::incr(&self.counters.checkout_failures);
                        self.emit(
                            DatabaseEvent::new(
                                DatabaseEventKind::ConnectionTimeout,
                                context.operation.clone(),
                            )
                            .with_duration(waited)
                            .with_metadata(serde_json::json!({
                                "request_id": context.request_id,
                                "priority": priority,
                            }))
                            .failed(),
                        );
                        warn!(
                            "等待连接超时: 操作={}, 已等待={:?}",
                            context.operation, waited
                        );
                        let waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX);
                        return Err(GuardError::QueueTimeout { waited_ms });
                    }
                    Err(WaitError::Rejected) => {
                        PoolCounters::incr(&self.counters.checkout_failures);
                        return Err(GuardError::PoolShuttingDown);
                    }
                }
            }
        };

        PoolCounters::incr(&self.counters.checkouts);
        self.emit(
            DatabaseEvent::new(DatabaseEventKind::ConnectionAcquired, context.operation.clone())
                .with_connection(conn.id)
                .with_duration(started.elapsed()),
        );
        Ok(conn)
    }

    /// 通过重试引擎打开新连接
    async fn create_connection(
        self: &Arc<Self>,
        reservation: CreateReservation<'_>,
        connection_type: ConnectionType,
        context: &OperationContext,
    ) -> GuardResult<PooledConnection> {
        let started = Instant::now();
        let factory = &self.factory;
        let outcome = self
            .retry
            .execute_with_retry(
                |_| async move { factory.open().await.map_err(GuardError::from) },
                context,
            )
            .await;
        let attempts = outcome.attempts;

        match outcome.into_result() {
            Ok(conn) => {
                let id = self.next_id.fetch_add(1, Ordering::SeqCst);
                {
                    let mut state = self.state.lock();
                    reservation.commit(&mut state);
                    if !self.is_shutting_down() {
                        state
                            .connections
                            .insert(id, ConnectionState::new(id, connection_type));
                    }
                }

                if self.is_shutting_down() {
                    self.discard(id, conn, "连接池正在关闭");
                    return Err(GuardError::PoolShuttingDown);
                }

                PoolCounters::incr(&self.counters.connections_created);
                self.emit(
                    DatabaseEvent::new(DatabaseEventKind::ConnectionCreated, context.operation.clone())
                        .with_connection(id)
                        .with_duration(started.elapsed())
                        .with_metadata(serde_json::json!({ "attempts": attempts })),
                );
                debug!("创建新连接: ID={}, 尝试次数={}", id, attempts);
                Ok(PooledConnection::new(id, conn, Arc::clone(self)))
            }
            Err(err) => {
                drop(reservation);
                let category = err.category();
                self.breaker.record_failure(category);
                PoolCounters::incr(&self.counters.creation_failures);
                self.emit(
                    DatabaseEvent::new(DatabaseEventKind::ConnectionError, context.operation.clone())
                        .with_duration(started.elapsed())
                        .with_metadata(serde_json::json!({
                            "attempts": attempts,
                            "category": category,
                            "error": err.to_string(),
                        }))
                        .failed(),
                );
                error!(
                    "创建连接失败: 目标={}, 尝试次数={}, 类别={}, 错误={}",
                    self.factory.describe(),
                    attempts,
                    category,
                    err
                );
                Err(err)
            }
        }
    }

    /// 归还连接（由 `PooledConnection` 的 Drop 调用）
    fn release(self: &Arc<Self>, id: u64, conn: Box<dyn EngineConnection>, broken: bool) {
        PoolCounters::incr(&self.counters.releases);
        let mut state = self.state.lock();

        let status = state.connections.get(&id).map(|record| record.status);
        let reason = if broken {
            Some("连接遇到严重错误")
        } else if status == Some(ConnectionStatus::InTransaction) {
            Some("事务未正常结束")
        } else if status.is_none() {
            Some("连接记录不存在")
        } else if self.is_shutting_down() {
            Some("连接池正在关闭")
        } else {
            None
        };

        if let Some(reason) = reason {
            state.connections.remove(&id);
            let has_waiters = !self.queue.is_empty();
            drop(state);
            self.discard(id, conn, reason);
            if has_waiters && !self.is_shutting_down() {
                self.spawn_replenish();
            }
            return;
        }

        if let Some(record) = state.connections.get_mut(&id) {
            record.deactivate();
        }
        self.hand_off(&mut state, id, conn);
        drop(state);

        self.emit(DatabaseEvent::new(DatabaseEventKind::ConnectionReleased, "release").with_connection(id));
    }

    /// 把空闲连接交给等待者，没有等待者时放回可用列表
    fn hand_off(self: &Arc<Self>, state: &mut PoolState, id: u64, conn: Box<dyn EngineConnection>) {
        if let Some(record) = state.connections.get_mut(&id) {
            record.activate(None);
        }

        let guard = PooledConnection::new(id, conn, Arc::clone(self));
        match self.queue.service_next(guard) {
            None => {
                crate::debug_log!("连接 {} 直接交给等待者", id);
            }
            Some(mut returned) => {
                if let Some(record) = state.connections.get_mut(&id) {
                    record.deactivate();
                }
                if let Some(conn) = returned.conn.take() {
                    state.available.push_back(IdleConnection {
                        id,
                        conn,
                        idle_since: Instant::now(),
                    });
                }
            }
        }
    }

    /// 在后台关闭连接
    pub(super) fn discard(&self, id: u64, conn: Box<dyn EngineConnection>, reason: &str) {
        PoolCounters::incr(&self.counters.connections_closed);
        self.emit(
            DatabaseEvent::new(DatabaseEventKind::ConnectionClosed, "discard")
                .with_connection(id)
                .with_metadata(serde_json::json!({ "reason": reason })),
        );
        debug!("关闭连接: ID={}, 原因={}", id, reason);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = conn.close().await {
                        debug!("关闭连接 {} 时出错: {}", id, e);
                    }
                });
            }
            Err(_) => drop(conn),
        }
    }

    /// 有连接被丢弃而仍有等待者时，补建一个连接交给等待者
    fn spawn_replenish(self: &Arc<Self>) {
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let pool = Arc::clone(self);
        handle.spawn(async move {
            pool.replenish().await;
        });
    }

    async fn replenish(self: Arc<Self>) {
        let reservation = {
            let mut state = self.state.lock();
            if self.queue.is_empty()
                || state.connections.len() as u32 + state.pending_creates
                    >= self.config.max_connections
            {
                return;
            }
            state.pending_creates += 1;
            CreateReservation::new(&self)
        };

        let context = OperationContext::new("replenish");
        if let Ok(conn) = self
            .create_connection(reservation, ConnectionType::Read, &context)
            .await
        {
            // 经由归还路径交给等待者
            drop(conn);
        }
    }

    fn set_status(&self, id: u64, status: ConnectionStatus) {
        if let Some(record) = self.state.lock().connections.get_mut(&id) {
            record.status = status;
        }
    }

    /// 向熔断器报告一次尝试的结果
    fn report<T>(&self, conn: &mut PooledConnection, result: &GuardResult<T>, context: &OperationContext) {
        match result {
            Ok(_) => self.breaker.record_success(),
            Err(err) if err.affects_health() => {
                let category = err.category();
                self.breaker.record_failure(category);
                if category == ErrorCategory::Critical {
                    conn.mark_broken();
                }
                self.emit(
                    DatabaseEvent::new(DatabaseEventKind::ErrorOccurred, context.operation.clone())
                        .with_connection(conn.id)
                        .with_metadata(serde_json::json!({
                            "request_id": context.request_id,
                            "category": category,
                            "error": err.to_string(),
                        }))
                        .failed(),
                );
            }
            Err(_) => {}
        }
    }

    async fn run_transaction<T, F>(
        &self,
        conn: &mut PooledConnection,
        op: &Mutex<F>,
    ) -> GuardResult<T>
    where
        F: for<'c> FnMut(&'c mut PooledConnection) -> BoxFuture<'c, GuardResult<T>>,
    {
        conn.begin().await?;

        let fut = {
            let mut f = op.lock();
            (*f)(conn)
        };
        let result = fut.await;

        match result {
            Ok(value) => match conn.commit().await {
                Ok(()) => Ok(value),
                Err(commit_err) => {
                    warn!("提交事务失败，尝试回滚: {}", commit_err);
                    // 回滚失败时状态保持 InTransaction，归还时连接会被关闭
                    if let Err(rollback_err) = conn.rollback().await {
                        warn!("回滚事务失败: {}", rollback_err);
                    }
                    Err(commit_err)
                }
            },
            Err(err) => {
                if let Err(rollback_err) = conn.rollback().await {
                    warn!("回滚事务失败: {}", rollback_err);
                }
                Err(err)
            }
        }
    }
}

impl Drop for PoolInner {
    fn drop(&mut self) {
        if let Some(handle) = self.monitor.get_mut().take() {
            handle.abort();
        }
    }
}

/// 从连接池借出的连接
///
/// 离开作用域时自动归还；遇到严重错误的连接会被关闭而不是归还
pub struct PooledConnection {
    id: u64,
    conn: Option<Box<dyn EngineConnection>>,
    pool: Arc<PoolInner>,
    broken: bool,
}

impl PooledConnection {
    fn new(id: u64, conn: Box<dyn EngineConnection>, pool: Arc<PoolInner>) -> Self {
        Self {
            id,
            conn: Some(conn),
            pool,
            broken: false,
        }
    }

    /// 连接ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// 标记为损坏，归还时关闭
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }

    /// 是否已被标记为损坏
    pub fn is_broken(&self) -> bool {
        self.broken
    }

    fn engine(&mut self) -> GuardResult<&mut (dyn EngineConnection + 'static)> {
        self.conn
            .as_deref_mut()
            .ok_or_else(|| crate::quick_error!(connection, "连接已归还"))
    }

    fn observe<T>(&mut self, result: Result<T, EngineError>) -> GuardResult<T> {
        result.map_err(|e| {
            if classify(&e) == ErrorCategory::Critical {
                self.broken = true;
            }
            GuardError::Engine(e)
        })
    }

    /// 执行写语句
    pub async fn execute(&mut self, sql: &str, params: &[DataValue]) -> GuardResult<ExecuteResult> {
        let result = self.engine()?.execute(sql, params).await;
        self.observe(result)
    }

    /// 查询全部行
    pub async fn fetch_all(&mut self, sql: &str, params: &[DataValue]) -> GuardResult<Vec<Row>> {
        let result = self.engine()?.fetch_all(sql, params).await;
        self.observe(result)
    }

    /// 查询第一行
    pub async fn fetch_optional(&mut self, sql: &str, params: &[DataValue]) -> GuardResult<Option<Row>> {
        let result = self.engine()?.fetch_optional(sql, params).await;
        self.observe(result)
    }

    /// 执行多条语句
    pub async fn execute_script(&mut self, sql: &str) -> GuardResult<()> {
        let result = self.engine()?.execute_script(sql).await;
        self.observe(result)
    }

    /// BEGIN IMMEDIATE
    ///
    /// 成功后连接处于 InTransaction，未提交或回滚就归还的连接会被关闭
    pub async fn begin(&mut self) -> GuardResult<()> {
        let result = self.engine()?.begin().await;
        self.observe(result)?;
        self.pool.set_status(self.id, ConnectionStatus::InTransaction);
        Ok(())
    }

    /// COMMIT
    pub async fn commit(&mut self) -> GuardResult<()> {
        let result = self.engine()?.commit().await;
        self.observe(result)?;
        self.pool.set_status(self.id, ConnectionStatus::Active);
        Ok(())
    }

    /// ROLLBACK
    pub async fn rollback(&mut self) -> GuardResult<()> {
        let result = self.engine()?.rollback().await;
        self.observe(result)?;
        self.pool.set_status(self.id, ConnectionStatus::Active);
        Ok(())
    }

    /// 检查连接是否可用
    pub async fn ping(&mut self) -> GuardResult<()> {
        let result = self.engine()?.ping().await;
        self.observe(result)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(self.id, conn, self.broken);
        }
    }
}

/// 数据库连接池
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// 创建连接池并启动后台巡检
    ///
    /// 连接按需创建；不在 tokio 运行时内创建时不启动巡检
    pub fn new(
        config: PoolConfig,
        circuit: CircuitBreakerConfig,
        factory: Arc<dyn ConnectionFactory>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let retry = RetryEngine::new(RetryConfig::from_pool_config(&config), Arc::clone(&events));
        let monitor_interval = config.monitor_interval;

        info!(
            "创建连接池: 目标={}, 最大连接数={}, 等待超时={:?}",
            factory.describe(),
            config.max_connections,
            config.connection_timeout
        );

        let inner = Arc::new(PoolInner {
            config,
            factory,
            state: Mutex::new(PoolState {
                connections: HashMap::new(),
                available: VecDeque::new(),
                pending_creates: 0,
            }),
            queue: WaitQueue::new(),
            breaker: CircuitBreaker::new(circuit),
            retry,
            events,
            counters: PoolCounters::default(),
            next_id: AtomicU64::new(1),
            shutting_down: AtomicBool::new(false),
            monitor: Mutex::new(None),
        });

        let handle = spawn_monitor(Arc::downgrade(&inner), monitor_interval);
        *inner.monitor.lock() = handle;

        Self { inner }
    }

    /// 获取连接
    ///
    /// 依次尝试：复用空闲连接、在上限内新建连接、进入等待队列
    pub async fn get_connection(
        &self,
        connection_type: ConnectionType,
        priority: Priority,
        context: &OperationContext,
    ) -> GuardResult<PooledConnection> {
        self.inner.acquire(connection_type, priority, context).await
    }

    /// 归还连接，等价于直接丢弃 `PooledConnection`
    pub fn release_connection(&self, conn: PooledConnection) {
        drop(conn);
    }

    /// 借出连接执行操作，整个过程（获取、执行、归还）由重试引擎包裹
    pub async fn execute_with_connection<T, F>(
        &self,
        op: F,
        connection_type: ConnectionType,
        priority: Priority,
        context: &OperationContext,
    ) -> GuardResult<T>
    where
        F: for<'c> FnMut(&'c mut PooledConnection) -> BoxFuture<'c, GuardResult<T>> + Send,
        T: Send,
    {
        let op = Mutex::new(op);
        let op = &op;
        let inner = &self.inner;

        self.inner
            .retry
            .execute(
                |_| async move {
                    let mut conn = inner.acquire(connection_type, priority, context).await?;
                    let fut = {
                        let mut f = op.lock();
                        (*f)(&mut conn)
                    };
                    let result = fut.await;
                    inner.report(&mut conn, &result, context);
                    result
                },
                context,
            )
            .await
    }

    /// 在 `BEGIN IMMEDIATE` / `COMMIT` / `ROLLBACK` 中执行操作
    ///
    /// 操作返回错误时回滚，整个事务作为一次尝试参与重试。
    /// 事务以 High 优先级排队，不会被大量读请求饿死
    pub async fn execute_transaction<T, F>(&self, op: F, context: &OperationContext) -> GuardResult<T>
    where
        F: for<'c> FnMut(&'c mut PooledConnection) -> BoxFuture<'c, GuardResult<T>> + Send,
        T: Send,
    {
        let op = Mutex::new(op);
        let op = &op;
        let inner = &self.inner;

        self.inner
            .retry
            .execute(
                |_| async move {
                    let mut conn = inner
                        .acquire(ConnectionType::Transaction, Priority::High, context)
                        .await?;
                    let result = inner.run_transaction(&mut conn, op).await;
                    inner.report(&mut conn, &result, context);
                    result
                },
                context,
            )
            .await
    }

    /// 连接池状态
    pub fn status(&self) -> PoolStatus {
        self.inner.status()
    }

    /// 累计指标
    pub fn metrics(&self) -> PoolMetrics {
        self.inner.counters.snapshot()
    }

    /// 每个连接的诊断信息，按ID排序
    pub fn connection_states(&self) -> Vec<ConnectionInfo> {
        let state = self.inner.state.lock();
        let mut infos: Vec<ConnectionInfo> = state.connections.values().map(ConnectionState::info).collect();
        infos.sort_by_key(|info| info.id);
        infos
    }

    /// 熔断器
    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.inner.breaker
    }

    /// 重试引擎
    pub fn retry_engine(&self) -> &RetryEngine {
        &self.inner.retry
    }

    /// 连接池配置
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// 是否正在关闭
    pub fn is_shutting_down(&self) -> bool {
        self.inner.is_shutting_down()
    }

    /// 立即执行一次巡检
    pub async fn run_maintenance(&self) -> super::monitor::MonitorReport {
        self.inner.sweep().await
    }

    /// 关闭连接池
    ///
    /// 停止巡检、拒绝所有等待者并关闭空闲连接；借出中的连接在归还时关闭
    pub async fn shutdown(&self) {
        if self.inner.shutting_down.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(handle) = self.inner.monitor.lock().take() {
            handle.abort();
        }

        let rejected = self.inner.queue.drain();

        let idle: Vec<IdleConnection> = {
            let mut state = self.inner.state.lock();
            let idle: Vec<IdleConnection> = state.available.drain(..).collect();
            for connection in &idle {
                state.connections.remove(&connection.id);
            }
            idle
        };

        let closed = idle.len();
        for connection in idle {
            PoolCounters::incr(&self.inner.counters.connections_closed);
            self.inner.emit(
                DatabaseEvent::new(DatabaseEventKind::ConnectionClosed, "shutdown")
                    .with_connection(connection.id),
            );
            if let Err(e) = connection.conn.close().await {
                debug!("关闭连接 {} 时出错: {}", connection.id, e);
            }
        }

        info!(
            "连接池已关闭: 关闭空闲连接={}, 拒绝等待者={}",
            closed, rejected
        );
    }
}
