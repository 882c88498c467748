//! Disque-dialect broker client over the redis protocol.
//!
//! Disque speaks RESP, so the `redis` crate's connection machinery works
//! unchanged; only the command set differs. `ConnectionManager` handles
//! reconnection, and each operation clones a cheap handle so the client can
//! be shared behind an `Arc`.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use tracing::{debug, info};

use super::errors::{BrokerError, BrokerResult};
use super::{AddOptions, Broker, GetOptions, RawJob};

/// Command timeout for ADDJOB replication, in milliseconds.
const ADDJOB_TIMEOUT_MS: u64 = 2000;

/// Redis-protocol client for a Disque-style broker.
#[derive(Clone)]
pub struct DisqueBroker {
    connection: ConnectionManager,
}

impl DisqueBroker {
    /// Connect to the broker at `url` (e.g. `redis://localhost:7711`).
    pub async fn connect(url: &str) -> BrokerResult<Self> {
        let client =
            redis::Client::open(url).map_err(|e| BrokerError::connection(e.to_string()))?;
        let connection = ConnectionManager::new(client)
            .await
            .map_err(|e| BrokerError::connection(e.to_string()))?;

        info!(url = %url, "🚀 connected to job broker");
        Ok(Self { connection })
    }
}

#[async_trait]
impl Broker for DisqueBroker {
    async fn add_job(
        &self,
        queue: &str,
        payload: &str,
        options: &AddOptions,
    ) -> BrokerResult<String> {
        let mut cmd = redis::cmd("ADDJOB");
        cmd.arg(queue).arg(payload).arg(ADDJOB_TIMEOUT_MS);
        if let Some(delay) = options.delay {
            cmd.arg("DELAY").arg(delay.as_secs());
        }
        if let Some(retry) = options.retry_timeout {
            cmd.arg("RETRY").arg(retry.as_secs());
        }
        if let Some(ttl) = options.ttl {
            cmd.arg("TTL").arg(ttl.as_secs());
        }

        let mut conn = self.connection.clone();
        let id: String = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("ADDJOB", e.to_string()))?;

        debug!(queue = %queue, job_id = %id, "job added");
        Ok(id)
    }

    async fn get_jobs(&self, queues: &[String], options: &GetOptions) -> BrokerResult<Vec<RawJob>> {
        let mut cmd = redis::cmd("GETJOB");
        cmd.arg("TIMEOUT")
            .arg(options.timeout.as_millis() as u64)
            .arg("COUNT")
            .arg(options.count);
        if options.with_counters {
            cmd.arg("WITHCOUNTERS");
        }
        cmd.arg("FROM");
        for queue in queues {
            cmd.arg(queue);
        }

        let mut conn = self.connection.clone();
        let reply: redis::Value = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("GETJOB", e.to_string()))?;

        parse_getjob_reply(reply)
    }

    async fn ack_job(&self, id: &str) -> BrokerResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("ACKJOB")
            .arg(id)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| BrokerError::command("ACKJOB", e.to_string()))?;
        debug!(job_id = %id, "job acked");
        Ok(())
    }

    async fn nack(&self, id: &str) -> BrokerResult<()> {
        let mut conn = self.connection.clone();
        redis::cmd("NACK")
            .arg(id)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| BrokerError::command("NACK", e.to_string()))?;
        debug!(job_id = %id, "job nacked");
        Ok(())
    }

    async fn queue_len(&self, queue: &str) -> BrokerResult<u64> {
        let mut conn = self.connection.clone();
        let len: u64 = redis::cmd("QLEN")
            .arg(queue)
            .query_async(&mut conn)
            .await
            .map_err(|e| BrokerError::command("QLEN", e.to_string()))?;
        Ok(len)
    }
}

/// Parse a GETJOB reply.
///
/// Each entry is `[queue, id, payload]`, extended with alternating
/// counter-name/value pairs (`"nacks", n, "additional-deliveries", m`) when
/// WITHCOUNTERS was requested. A nil reply means the timeout expired with
/// nothing to deliver.
fn parse_getjob_reply(reply: redis::Value) -> BrokerResult<Vec<RawJob>> {
    let entries = match reply {
        redis::Value::Nil => return Ok(Vec::new()),
        redis::Value::Bulk(entries) => entries,
        other => {
            return Err(BrokerError::protocol(
                "GETJOB",
                format!("expected array reply, got {other:?}"),
            ))
        }
    };

    let mut jobs = Vec::with_capacity(entries.len());
    for entry in entries {
        let fields = match entry {
            redis::Value::Bulk(fields) if fields.len() >= 3 => fields,
            other => {
                return Err(BrokerError::protocol(
                    "GETJOB",
                    format!("expected [queue, id, payload, ...] entry, got {other:?}"),
                ))
            }
        };

        let queue = string_field(&fields[0], "queue")?;
        let id = string_field(&fields[1], "id")?;
        let payload = string_field(&fields[2], "payload")?;

        let mut nacks = 0;
        let mut additional_deliveries = 0;
        let mut rest = fields[3..].iter();
        while let (Some(name), Some(value)) = (rest.next(), rest.next()) {
            let name = string_field(name, "counter name")?;
            let value = int_field(value, &name)?;
            match name.as_str() {
                "nacks" => nacks = value,
                "additional-deliveries" => additional_deliveries = value,
                _ => debug!(counter = %name, "ignoring unknown GETJOB counter"),
            }
        }

        jobs.push(RawJob {
            id,
            queue,
            payload,
            nacks,
            additional_deliveries,
        });
    }

    Ok(jobs)
}

fn string_field(value: &redis::Value, what: &str) -> BrokerResult<String> {
    match value {
        redis::Value::Data(bytes) => String::from_utf8(bytes.clone()).map_err(|e| {
            BrokerError::protocol("GETJOB", format!("{what} is not valid UTF-8: {e}"))
        }),
        redis::Value::Status(s) => Ok(s.clone()),
        other => Err(BrokerError::protocol(
            "GETJOB",
            format!("expected string for {what}, got {other:?}"),
        )),
    }
}

fn int_field(value: &redis::Value, what: &str) -> BrokerResult<u64> {
    match value {
        redis::Value::Int(n) => Ok((*n).max(0) as u64),
        other => Err(BrokerError::protocol(
            "GETJOB",
            format!("expected integer for {what}, got {other:?}"),
        )),
    }
}
