//! Owns the running contest machines.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use tracing::{info, warn};

use super::machines::{ContestHandle, ContestMachine};
use super::models::{Contest, ContestState};
use crate::common::ContestId;
use crate::kernel::ArenaDeps;

pub struct ContestSupervisor {
    deps: Arc<ArenaDeps>,
    handles: Mutex<HashMap<ContestId, ContestHandle>>,
}

impl ContestSupervisor {
    pub fn new(deps: Arc<ArenaDeps>) -> Self {
        Self {
            deps,
            handles: Mutex::new(HashMap::new()),
        }
    }

    /// Start a machine for every contest that has not finished. Returns how
    /// many were started.
    pub async fn resume_all(&self) -> Result<usize> {
        let contests = self.deps.contests.unfinished_contests().await?;
        let mut started = 0;
        for contest in contests {
            if self.launch(contest) {
                started += 1;
            }
        }
        info!(started, "contests resumed");
        Ok(started)
    }

    /// Start (or resume) one contest. A contest that already has a live
    /// machine is left alone.
    pub async fn start(&self, contest_id: ContestId) -> Result<()> {
        let contest = self
            .deps
            .contests
            .find_contest(contest_id)
            .await?
            .ok_or_else(|| anyhow!("contest {} not found", contest_id))?;
        if contest.state.is_terminal() {
            warn!(contest_id = %contest_id, state = %contest.state, "contest already finished");
            return Ok(());
        }
        self.launch(contest);
        Ok(())
    }

    pub fn state(&self, contest_id: ContestId) -> Option<ContestState> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&contest_id)
            .map(ContestHandle::state)
    }

    /// Fail a running contest.
    pub fn abort(&self, contest_id: ContestId) -> bool {
        match self
            .handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&contest_id)
        {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Number of machines still running.
    pub fn running(&self) -> usize {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .filter(|h| !h.is_finished())
            .count()
    }

    /// Remove a machine's handle, e.g. to wait on it.
    pub fn take(&self, contest_id: ContestId) -> Option<ContestHandle> {
        self.handles
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&contest_id)
    }

    fn launch(&self, contest: Contest) -> bool {
        let mut handles = self.handles.lock().unwrap_or_else(|e| e.into_inner());
        if handles.get(&contest.id).is_some_and(|h| !h.is_finished()) {
            return false;
        }

        let contest_id = contest.id;
        info!(contest_id = %contest_id, state = %contest.state, "starting contest machine");
        let handle = ContestMachine::spawn(self.deps.clone(), contest);
        handles.insert(contest_id, handle);
        true
    }
}
