//! Broker response unmarshalling.
//!
//! Turns raw GETJOB entries into [`Job`]s. A malformed entry is logged and
//! dropped; the batch (and the consumer loop) carries on. The entry stays
//! unacked in the broker and will be redelivered, so a transiently corrupt
//! read does not lose the job.

use tracing::warn;

use crate::job::codec::{self, CodecError};
use crate::job::Job;

use super::RawJob;

/// Reconstruct one job from a raw broker entry.
pub fn job_from_raw(raw: RawJob) -> Result<Job, CodecError> {
    let decoded = codec::decode_payload(&raw.payload)?;
    Ok(Job::from_broker(
        raw.id,
        raw.queue,
        decoded.body,
        decoded.metadata,
        raw.nacks,
        raw.additional_deliveries,
    ))
}

/// Reconstruct a batch, dropping malformed entries with a warning.
pub fn jobs_from_raw(raws: Vec<RawJob>) -> Vec<Job> {
    let mut jobs = Vec::with_capacity(raws.len());
    for raw in raws {
        let id = raw.id.clone();
        let queue = raw.queue.clone();
        match job_from_raw(raw) {
            Ok(job) => jobs.push(job),
            Err(err) => warn!(
                job_id = %id,
                queue = %queue,
                error = %err,
                "dropping malformed job entry from batch"
            ),
        }
    }
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::codec::encode_payload;
    use chrono::Utc;
    use serde_json::json;
    use std::time::Duration;

    fn raw_for(job: &Job, id: &str) -> RawJob {
        RawJob {
            id: id.to_string(),
            queue: job.queue().to_string(),
            payload: encode_payload(job).unwrap(),
            nacks: 1,
            additional_deliveries: 0,
        }
    }

    #[test]
    fn reconstructs_job_with_counters() {
        let source = Job::with_lifetime("emails", json!({"n": 1}), Duration::from_secs(60), Utc::now());
        let job = job_from_raw(raw_for(&source, "D-1")).unwrap();

        assert_eq!(job.id(), Some("D-1"));
        assert_eq!(job.queue(), "emails");
        assert_eq!(job.body(), source.body());
        assert_eq!(job.nacks(), 1);
    }

    #[test]
    fn malformed_entries_are_dropped_not_fatal() {
        let good = Job::new("emails", json!(1));
        let raws = vec![
            RawJob {
                id: "D-bad".into(),
                queue: "emails".into(),
                payload: "{broken".into(),
                nacks: 0,
                additional_deliveries: 0,
            },
            raw_for(&good, "D-good"),
        ];

        let jobs = jobs_from_raw(raws);
        assert_eq!(jobs.len(), 1);
        assert_eq!(jobs[0].id(), Some("D-good"));
    }
}
