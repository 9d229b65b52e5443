use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{Catalog, ResolvedChallenge};
use crate::config::LimitsConfig;
use crate::create_timestamp;
use crate::identity::Caller;
use crate::provisioner::{Deployment, Provisioner};
use crate::quota;
use crate::state::{self, Instance, InstanceStatus, StatePaths};
use crate::storage::{self, StorageError};

/// Typed failures of the lifecycle operations. Every variant maps to a
/// stable error kind at the request layer.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("unknown challenge `{0}`")]
    InvalidChallenge(String),

    #[error("an instance of this challenge is already live")]
    Conflict,

    #[error("instance limit reached ({limit}); stop an instance first")]
    QuotaExceeded { limit: u64 },

    #[error("instance {0} not found")]
    NotFound(u64),

    #[error("not the owner of instance {0}")]
    Forbidden(u64),

    #[error("instance {0} is still starting; retry once it is running")]
    Pending(u64),

    #[error("state for instance {0} is inconsistent: {1}")]
    Inconsistent(u64, String),

    #[error("failed to provision sandbox: {0:#}")]
    ProvisionFailure(anyhow::Error),

    #[error("failed to tear down sandbox: {0}")]
    TeardownFailure(String),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StartOutcome {
    pub instance_id: u64,
    pub problem: String,
    pub title: String,
    pub external_port: u16,
}

#[derive(Serialize, Deserialize, Debug)]
pub struct StopOutcome {
    pub instance_id: u64,
    pub container: String,
}

/// One row of the instance listing. `owner` is only present for admins.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct InstanceView {
    pub instance_id: u64,
    pub problem: String,
    pub title: String,
    pub status: InstanceStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<String>,
}

/// Metadata captured while reserving, kept so the commit phase can
/// reconstruct the record if it vanished while provisioning ran unlocked.
struct Reservation {
    instance_id: u64,
    problem: String,
    challenge_id: String,
    title: String,
    owner: String,
    created_time: String,
}

impl Reservation {
    fn to_instance(&self, status: InstanceStatus) -> Instance {
        Instance {
            instance_id: self.instance_id,
            problem: self.problem.clone(),
            challenge_id: self.challenge_id.clone(),
            title: self.title.clone(),
            owner: self.owner.clone(),
            status,
            port: None,
            container: None,
            error: None,
            created_time: self.created_time.clone(),
            updated_time: self.created_time.clone(),
        }
    }
}

/// Orchestrates the instance state machine over the persisted table.
///
/// Every operation is a sequence of short locked read-modify-write phases;
/// the only unbounded step, the engine call, always runs between them with
/// no lock held. The manager keeps no state of its own across requests,
/// so any number of them (in this process or another) stay coherent
/// through the document locks alone.
pub struct InstanceManager {
    paths: StatePaths,
    limits: LimitsConfig,
    catalog: Arc<Catalog>,
    provisioner: Arc<dyn Provisioner>,
}

impl InstanceManager {
    pub fn new(
        paths: StatePaths,
        limits: LimitsConfig,
        catalog: Arc<Catalog>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Self {
        Self {
            paths,
            limits,
            catalog,
            provisioner,
        }
    }

    /// Starts a new instance of `problem_key` for the caller.
    ///
    /// Phase 1 (locked) validates and reserves a `starting` record; phase 2
    /// (unlocked) provisions the sandbox; phase 3 (locked) commits the
    /// outcome. A provisioning failure rolls the reservation back entirely.
    pub fn start(
        &self,
        caller: &Caller,
        problem_key: &str,
    ) -> Result<StartOutcome, LifecycleError> {
        let challenge = self
            .catalog
            .resolve(problem_key)
            .ok_or_else(|| LifecycleError::InvalidChallenge(problem_key.to_string()))?;

        let reservation = self.reserve(caller, &challenge)?;

        let deployed = self.provisioner.deploy(
            &challenge.build_dir,
            reservation.instance_id,
            challenge.internal_port,
        );

        match deployed {
            Ok(deployment) => {
                self.commit_running(&reservation, &deployment)?;
                Ok(StartOutcome {
                    instance_id: reservation.instance_id,
                    problem: reservation.problem,
                    title: reservation.title,
                    external_port: deployment.external_port,
                })
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback_reservation(reservation.instance_id) {
                    log::error!(
                        "failed to roll back reservation {}: {rollback_err}",
                        reservation.instance_id
                    );
                }
                Err(LifecycleError::ProvisionFailure(e))
            }
        }
    }

    /// Stops the instance and releases its record.
    ///
    /// On teardown failure the record is kept with `status = error` so an
    /// operator can inspect and retry it; it is never silently deleted.
    pub fn stop(&self, caller: &Caller, instance_id: u64) -> Result<StopOutcome, LifecycleError> {
        let stopping = self.mark_stopping(caller, instance_id)?;
        let container = stopping.container.clone().unwrap_or_default();

        let result = self.provisioner.teardown(&container);

        self.commit_stopped(stopping, container, result)
    }

    /// Snapshot of the caller's instances (all instances for admins),
    /// ordered by ascending instance id.
    pub fn list(&self, caller: &Caller) -> Result<Vec<InstanceView>, LifecycleError> {
        let doc = storage::with_lock(&self.paths.state_lock, || {
            state::load_state_unlocked(&self.paths)
        })?;

        let admin = caller.is_admin();
        let mut rows: Vec<InstanceView> = doc
            .instances
            .values()
            .filter(|inst| admin || inst.owner == caller.username)
            .map(|inst| InstanceView {
                instance_id: inst.instance_id,
                problem: inst.problem.clone(),
                title: inst.title.clone(),
                status: inst.status,
                port: inst.port,
                owner: admin.then(|| inst.owner.clone()),
            })
            .collect();
        rows.sort_by_key(|row| row.instance_id);
        Ok(rows)
    }

    pub fn user_instance_limit(&self) -> Result<u64, StorageError> {
        state::user_instance_limit(&self.paths, &self.limits)
    }

    pub fn set_user_instance_limit(&self, limit: u64) -> Result<u64, state::SettingsError> {
        state::set_user_instance_limit(&self.paths, &self.limits, limit)
    }

    /// Phase 1 of start: duplicate and quota checks plus the `starting`
    /// record, all under the state lock.
    fn reserve(
        &self,
        caller: &Caller,
        challenge: &ResolvedChallenge,
    ) -> Result<Reservation, LifecycleError> {
        storage::with_lock(&self.paths.state_lock, || {
            let mut doc = state::load_state_unlocked(&self.paths);

            let duplicate = doc.instances.values().any(|inst| {
                inst.owner == caller.username
                    && inst.problem == challenge.key
                    && inst.status.is_live()
            });
            if duplicate {
                return Err(LifecycleError::Conflict);
            }

            if let Some(limit) = quota::concurrent_ceiling(caller, &self.paths, &self.limits)? {
                let active = doc
                    .instances
                    .values()
                    .filter(|inst| inst.owner == caller.username && inst.status.is_live())
                    .count() as u64;
                if active >= limit {
                    return Err(LifecycleError::QuotaExceeded { limit });
                }
            }

            let instance_id = state::allocate_instance_id(&mut doc);
            let reservation = Reservation {
                instance_id,
                problem: challenge.key.clone(),
                challenge_id: challenge.challenge_id.clone(),
                title: challenge.title.clone(),
                owner: caller.username.clone(),
                created_time: create_timestamp(),
            };
            doc.instances.insert(
                instance_id.to_string(),
                reservation.to_instance(InstanceStatus::Starting),
            );
            state::save_state_unlocked(&self.paths, &doc)?;

            log::info!(
                "reserved instance {instance_id} of `{}` for {}",
                challenge.key,
                caller.username
            );
            Ok(reservation)
        })?
    }

    /// Phase 3 of a successful start. Tolerates a reservation that vanished
    /// while provisioning ran unlocked by reconstructing the record.
    fn commit_running(
        &self,
        reservation: &Reservation,
        deployment: &Deployment,
    ) -> Result<(), LifecycleError> {
        storage::with_lock(&self.paths.state_lock, || {
            let mut doc = state::load_state_unlocked(&self.paths);
            let inst = doc
                .instances
                .entry(reservation.instance_id.to_string())
                .or_insert_with(|| {
                    log::warn!(
                        "reservation for instance {} vanished before commit, reconstructing",
                        reservation.instance_id
                    );
                    reservation.to_instance(InstanceStatus::Starting)
                });
            inst.port = Some(deployment.external_port);
            inst.container = Some(deployment.container.clone());
            inst.status = InstanceStatus::Running;
            inst.updated_time = create_timestamp();
            state::save_state_unlocked(&self.paths, &doc)?;

            log::info!(
                "instance {} running on port {}",
                reservation.instance_id,
                deployment.external_port
            );
            Ok(())
        })?
    }

    /// Deletes the `starting` record after a provisioning failure. No
    /// error-status ghost is left behind for a failed start.
    fn rollback_reservation(&self, instance_id: u64) -> Result<(), LifecycleError> {
        storage::with_lock(&self.paths.state_lock, || {
            let mut doc = state::load_state_unlocked(&self.paths);
            doc.instances.remove(&instance_id.to_string());
            state::save_state_unlocked(&self.paths, &doc)?;
            log::info!("rolled back reservation for instance {instance_id}");
            Ok(())
        })?
    }

    /// Phase 1 of stop: ownership and state checks, then the `stopping`
    /// mark, under the state lock. Returns the marked record.
    fn mark_stopping(
        &self,
        caller: &Caller,
        instance_id: u64,
    ) -> Result<Instance, LifecycleError> {
        storage::with_lock(&self.paths.state_lock, || {
            let mut doc = state::load_state_unlocked(&self.paths);
            let inst = doc
                .instances
                .get_mut(&instance_id.to_string())
                .ok_or(LifecycleError::NotFound(instance_id))?;

            if !caller.is_admin() && inst.owner != caller.username {
                return Err(LifecycleError::Forbidden(instance_id));
            }
            if inst.status == InstanceStatus::Starting {
                return Err(LifecycleError::Pending(instance_id));
            }
            if inst.container.is_none() {
                return Err(LifecycleError::Inconsistent(
                    instance_id,
                    "no container handle recorded".to_string(),
                ));
            }

            inst.status = InstanceStatus::Stopping;
            inst.updated_time = create_timestamp();
            let stopping = inst.clone();
            state::save_state_unlocked(&self.paths, &doc)?;
            Ok(stopping)
        })?
    }

    /// Phase 3 of stop: delete the record on success, keep it in `error`
    /// on failure.
    fn commit_stopped(
        &self,
        stopping: Instance,
        container: String,
        result: anyhow::Result<()>,
    ) -> Result<StopOutcome, LifecycleError> {
        let instance_id = stopping.instance_id;

        storage::with_lock(&self.paths.state_lock, || {
            let mut doc = state::load_state_unlocked(&self.paths);
            match result {
                Ok(()) => {
                    doc.instances.remove(&instance_id.to_string());
                    state::save_state_unlocked(&self.paths, &doc)?;
                    log::info!("instance {instance_id} stopped and released");
                    Ok(StopOutcome {
                        instance_id,
                        container,
                    })
                }
                Err(e) => {
                    let message = format!("{e:#}");
                    let inst = doc
                        .instances
                        .entry(instance_id.to_string())
                        .or_insert(stopping);
                    inst.status = InstanceStatus::Error;
                    inst.error = Some(message.clone());
                    inst.updated_time = create_timestamp();
                    state::save_state_unlocked(&self.paths, &doc)?;

                    log::error!("teardown of instance {instance_id} failed: {message}");
                    Err(LifecycleError::TeardownFailure(message))
                }
            }
        })?
    }
}
