//! Recording broker mock shared by unit and integration tests.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::broker::{AddOptions, Broker, BrokerError, BrokerResult, GetOptions, RawJob};

/// One recorded ADDJOB.
#[derive(Debug, Clone, PartialEq)]
pub struct AddedJob {
    pub queue: String,
    pub payload: String,
    pub options: AddOptions,
}

#[derive(Default)]
struct MockState {
    added: Vec<AddedJob>,
    acked: Vec<String>,
    nacked: Vec<String>,
    fetches: VecDeque<Vec<RawJob>>,
    queue_lengths: HashMap<String, u64>,
    next_id: u64,
    fail_adds: bool,
}

/// In-memory [`Broker`] that records every command and replays scripted
/// GETJOB batches.
#[derive(Default)]
pub struct MockBroker {
    state: Mutex<MockState>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the next GETJOB reply. Replies are consumed in order; once
    /// the script runs out every fetch returns an empty batch.
    pub fn push_fetch(&self, jobs: Vec<RawJob>) {
        self.state.lock().fetches.push_back(jobs);
    }

    pub fn set_queue_len(&self, queue: &str, len: u64) {
        self.state.lock().queue_lengths.insert(queue.to_string(), len);
    }

    /// Make every subsequent ADDJOB fail, for error-propagation tests.
    pub fn fail_adds(&self) {
        self.state.lock().fail_adds = true;
    }

    pub fn added(&self) -> Vec<AddedJob> {
        self.state.lock().added.clone()
    }

    pub fn acked(&self) -> Vec<String> {
        self.state.lock().acked.clone()
    }

    pub fn nacked(&self) -> Vec<String> {
        self.state.lock().nacked.clone()
    }
}

#[async_trait]
impl Broker for MockBroker {
    async fn add_job(
        &self,
        queue: &str,
        payload: &str,
        options: &AddOptions,
    ) -> BrokerResult<String> {
        let mut state = self.state.lock();
        if state.fail_adds {
            return Err(BrokerError::command("ADDJOB", "scripted failure"));
        }
        state.next_id += 1;
        let id = format!("D-mock-{}", state.next_id);
        state.added.push(AddedJob {
            queue: queue.to_string(),
            payload: payload.to_string(),
            options: options.clone(),
        });
        Ok(id)
    }

    async fn get_jobs(
        &self,
        _queues: &[String],
        _options: &GetOptions,
    ) -> BrokerResult<Vec<RawJob>> {
        Ok(self.state.lock().fetches.pop_front().unwrap_or_default())
    }

    async fn ack_job(&self, id: &str) -> BrokerResult<()> {
        self.state.lock().acked.push(id.to_string());
        Ok(())
    }

    async fn nack(&self, id: &str) -> BrokerResult<()> {
        self.state.lock().nacked.push(id.to_string());
        Ok(())
    }

    async fn queue_len(&self, queue: &str) -> BrokerResult<u64> {
        Ok(*self.state.lock().queue_lengths.get(queue).unwrap_or(&0))
    }
}
