//! Scripted in-memory driver for tests.
//!
//! [`StubDriver`] implements every driver capability against shared state,
//! so a test can queue result sets, switch individual operations to fail,
//! then inspect what the handler actually sent. Clones share state.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::ConnectionDescriptor;
use crate::driver::{BindStyle, Connect, Driver, ExecResult, Rows, Transaction};
use crate::error::DriverResult;
use crate::value::SqlValue;

/// Error returned by a failing stub operation. Displays its message verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StubError(pub String);

impl fmt::Display for StubError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::error::Error for StubError {}

/// A query or statement as the driver received it.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub args: Vec<SqlValue>,
}

#[derive(Debug, Default)]
struct Failures {
    begin: Option<String>,
    query: Option<String>,
    exec: Option<String>,
    commit: Option<String>,
    rollback: Option<String>,
    ping: Option<String>,
}

#[derive(Debug, Default)]
struct Counters {
    begins: usize,
    commits: usize,
    rollbacks: usize,
    closes: usize,
    pings: usize,
}

#[derive(Debug)]
struct StubState {
    bind_style: BindStyle,
    results: VecDeque<Rows>,
    exec_result: ExecResult,
    failures: Failures,
    counters: Counters,
    queries: Vec<Statement>,
    execs: Vec<Statement>,
}

fn fail(message: &Option<String>) -> DriverResult<()> {
    match message {
        Some(m) => Err(StubError(m.clone()).into()),
        None => Ok(()),
    }
}

/// Scripted driver. See the module docs.
#[derive(Debug, Clone)]
pub struct StubDriver {
    state: Arc<Mutex<StubState>>,
}

impl Default for StubDriver {
    fn default() -> Self {
        Self::new()
    }
}

impl StubDriver {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StubState {
                bind_style: BindStyle::Dollar,
                results: VecDeque::new(),
                exec_result: ExecResult {
                    rows_affected: 1,
                    last_insert_id: None,
                },
                failures: Failures::default(),
                counters: Counters::default(),
                queries: Vec::new(),
                execs: Vec::new(),
            })),
        }
    }

    pub fn with_bind_style(self, style: BindStyle) -> Self {
        self.state.lock().bind_style = style;
        self
    }

    /// Queue a result set for the next query.
    pub fn with_rows(self, rows: Rows) -> Self {
        self.push_rows(rows);
        self
    }

    pub fn push_rows(&self, rows: Rows) {
        self.state.lock().results.push_back(rows);
    }

    pub fn set_exec_result(&self, result: ExecResult) {
        self.state.lock().exec_result = result;
    }

    pub fn fail_begin(&self, message: &str) {
        self.state.lock().failures.begin = Some(message.to_string());
    }

    pub fn fail_query(&self, message: &str) {
        self.state.lock().failures.query = Some(message.to_string());
    }

    pub fn fail_exec(&self, message: &str) {
        self.state.lock().failures.exec = Some(message.to_string());
    }

    pub fn fail_commit(&self, message: &str) {
        self.state.lock().failures.commit = Some(message.to_string());
    }

    pub fn fail_rollback(&self, message: &str) {
        self.state.lock().failures.rollback = Some(message.to_string());
    }

    pub fn fail_ping(&self, message: &str) {
        self.state.lock().failures.ping = Some(message.to_string());
    }

    pub fn begins(&self) -> usize {
        self.state.lock().counters.begins
    }

    pub fn commits(&self) -> usize {
        self.state.lock().counters.commits
    }

    pub fn rollbacks(&self) -> usize {
        self.state.lock().counters.rollbacks
    }

    pub fn closes(&self) -> usize {
        self.state.lock().counters.closes
    }

    pub fn pings(&self) -> usize {
        self.state.lock().counters.pings
    }

    pub fn queries(&self) -> Vec<Statement> {
        self.state.lock().queries.clone()
    }

    pub fn execs(&self) -> Vec<Statement> {
        self.state.lock().execs.clone()
    }

    /// Every driver call recorded so far, of any kind.
    pub fn total_calls(&self) -> usize {
        let state = self.state.lock();
        let c = &state.counters;
        c.begins + c.commits + c.rollbacks + c.closes + c.pings + state.queries.len() + state.execs.len()
    }

    fn run_query(&self, sql: &str, args: &[SqlValue]) -> DriverResult<Rows> {
        let mut state = self.state.lock();
        state.queries.push(Statement {
            sql: sql.to_string(),
            args: args.to_vec(),
        });
        fail(&state.failures.query)?;
        Ok(state.results.pop_front().unwrap_or_default())
    }

    fn run_exec(&self, sql: &str, args: &[SqlValue]) -> DriverResult<ExecResult> {
        let mut state = self.state.lock();
        state.execs.push(Statement {
            sql: sql.to_string(),
            args: args.to_vec(),
        });
        fail(&state.failures.exec)?;
        Ok(state.exec_result)
    }
}

impl Driver for StubDriver {
    type Tx = StubTx;
    type Rows = Rows;

    fn bind_style(&self) -> BindStyle {
        self.state.lock().bind_style
    }

    async fn ping(&self) -> DriverResult<()> {
        let mut state = self.state.lock();
        state.counters.pings += 1;
        fail(&state.failures.ping)
    }

    async fn close(&self) -> DriverResult<()> {
        self.state.lock().counters.closes += 1;
        Ok(())
    }

    async fn begin(&self) -> DriverResult<StubTx> {
        let mut state = self.state.lock();
        state.counters.begins += 1;
        fail(&state.failures.begin)?;
        Ok(StubTx {
            driver: self.clone(),
            id: state.counters.begins,
        })
    }

    async fn query(&self, sql: &str, args: &[SqlValue]) -> DriverResult<Rows> {
        self.run_query(sql, args)
    }
}

/// Transaction handed out by [`StubDriver::begin`].
#[derive(Debug)]
pub struct StubTx {
    driver: StubDriver,
    id: usize,
}

impl StubTx {
    /// 1-based begin sequence number; equal ids mean the same transaction.
    pub fn id(&self) -> usize {
        self.id
    }
}

impl Transaction for StubTx {
    type Rows = Rows;

    async fn exec(&mut self, sql: &str, args: &[SqlValue]) -> DriverResult<ExecResult> {
        self.driver.run_exec(sql, args)
    }

    async fn query(&mut self, sql: &str, args: &[SqlValue]) -> DriverResult<Rows> {
        self.driver.run_query(sql, args)
    }

    async fn commit(&mut self) -> DriverResult<()> {
        let mut state = self.driver.state.lock();
        state.counters.commits += 1;
        fail(&state.failures.commit)
    }

    async fn rollback(&mut self) -> DriverResult<()> {
        let mut state = self.driver.state.lock();
        state.counters.rollbacks += 1;
        fail(&state.failures.rollback)
    }
}

/// Opener that fails a scripted number of times before handing out drivers.
#[derive(Debug, Default)]
pub struct StubConnector {
    open_failures: AtomicU32,
    ping_failures: AtomicU32,
    opens: AtomicU32,
    opened: Mutex<Vec<StubDriver>>,
}

impl StubConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The first `n` opens fail outright.
    pub fn failing_opens(self, n: u32) -> Self {
        self.open_failures.store(n, Ordering::SeqCst);
        self
    }

    /// After the open failures, the next `n` drivers fail their ping.
    pub fn failing_pings(self, n: u32) -> Self {
        self.ping_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    /// Every driver handed out so far, in order.
    pub fn opened(&self) -> Vec<StubDriver> {
        self.opened.lock().clone()
    }

    fn take_one(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

impl Connect for StubConnector {
    type Driver = StubDriver;

    async fn open(&self, descriptor: &ConnectionDescriptor) -> DriverResult<StubDriver> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        if Self::take_one(&self.open_failures) {
            return Err(StubError(format!("connection refused: {}", descriptor)).into());
        }

        let driver = StubDriver::new();
        if Self::take_one(&self.ping_failures) {
            driver.fail_ping("server is starting up");
        }
        self.opened.lock().push(driver.clone());
        Ok(driver)
    }
}
