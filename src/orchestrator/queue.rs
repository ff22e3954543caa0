use std::collections::VecDeque;

use crate::orchestrator::job::{JobTarget, RestartJob};

/// FIFO of jobs submitted while a cycle is running.
#[derive(Debug, Default)]
pub struct RestartQueue {
    jobs: VecDeque<RestartJob>,
}

impl RestartQueue {
    pub fn push(&mut self, job: RestartJob) {
        self.jobs.push_back(job);
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    /// Whether a waiting job already targets this artifact.
    pub fn targets(&self, target: &JobTarget) -> bool {
        self.jobs.iter().any(|j| j.target.as_ref() == Some(target))
    }

    /// Take every waiting job, in submission order.
    pub fn drain(&mut self) -> Vec<RestartJob> {
        self.jobs.drain(..).collect()
    }
}
