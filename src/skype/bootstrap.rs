// Session bootstrap
// The post-login operations run concurrently on a bounded JoinSet under one
// deadline; each task's outcome is reported on its own. The push channel
// subscription waits for endpoint registration, whose token it needs.

use log::{debug, error, info};
use std::fmt;
use std::sync::Arc;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;

use super::error::{ErrorSource, SkypeError, SkypeResult};
use super::SkypeClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BootstrapTask {
    DeviceCookie,
    Contacts,
    ContactRequests,
    PushChannel,
    Endpoint,
}

impl BootstrapTask {
    pub const ALL: [BootstrapTask; 5] = [
        BootstrapTask::DeviceCookie,
        BootstrapTask::Contacts,
        BootstrapTask::ContactRequests,
        BootstrapTask::PushChannel,
        BootstrapTask::Endpoint,
    ];

    async fn run(self, client: &SkypeClient) -> SkypeResult<()> {
        match self {
            BootstrapTask::DeviceCookie => client.fetch_device_cookie().await,
            BootstrapTask::Contacts => {
                client.load_profile().await?;
                client.load_all_contacts().await.map(|_| ())
            }
            BootstrapTask::ContactRequests => client.load_contact_requests().await.map(|_| ()),
            BootstrapTask::PushChannel => client.open_push_channel().await,
            BootstrapTask::Endpoint => client.register_endpoint().await,
        }
    }
}

impl fmt::Display for BootstrapTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Per-task outcome of a bootstrap.
#[derive(Debug, Default)]
pub struct BootstrapReport {
    pub completed: Vec<BootstrapTask>,
    pub failures: Vec<(BootstrapTask, SkypeError)>,
}

impl BootstrapReport {
    pub fn succeeded(&self, task: BootstrapTask) -> bool {
        self.completed.contains(&task)
    }

    pub fn failure(&self, task: BootstrapTask) -> Option<&SkypeError> {
        self.failures
            .iter()
            .find(|(failed, _)| *failed == task)
            .map(|(_, err)| err)
    }

    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Wait until the endpoint task finished; fail unless it registered.
async fn wait_for_endpoint(outcome: &mut watch::Receiver<Option<bool>>) -> SkypeResult<()> {
    let registered = outcome
        .wait_for(Option::is_some)
        .await
        .map(|state| *state == Some(true))
        .unwrap_or(false);
    if registered {
        Ok(())
    } else {
        Err(SkypeError::Bootstrap(
            "push channel needs a registered endpoint".to_string(),
        ))
    }
}

/// Run every bootstrap task for a freshly authenticated client.
///
/// Task failures are reported, not returned. The call itself fails only if
/// the deadline passes or a task panics.
pub async fn run_bootstrap(client: &SkypeClient) -> SkypeResult<BootstrapReport> {
    let workers = client.config.bootstrap_workers.max(1);
    let deadline = client.config.bootstrap_deadline();
    debug!("Bootstrapping session with {} workers", workers);

    let permits = Arc::new(Semaphore::new(workers));
    let (endpoint_tx, endpoint_rx) = watch::channel(None);
    let mut endpoint_tx = Some(endpoint_tx);
    let mut tasks = JoinSet::new();
    for task in BootstrapTask::ALL {
        let client = client.clone();
        let permits = permits.clone();
        let mut endpoint_outcome = endpoint_rx.clone();
        let endpoint_done = match task {
            BootstrapTask::Endpoint => endpoint_tx.take(),
            _ => None,
        };
        tasks.spawn(async move {
            // Wait before taking a permit
            if task == BootstrapTask::PushChannel {
                if let Err(e) = wait_for_endpoint(&mut endpoint_outcome).await {
                    return (task, Err(e));
                }
            }
            let result = match permits.acquire_owned().await {
                Ok(_permit) => task.run(&client).await,
                Err(e) => Err(SkypeError::Bootstrap(e.to_string())),
            };
            if let Some(done) = endpoint_done {
                done.send_replace(Some(result.is_ok()));
            }
            (task, result)
        });
    }

    let collect = async {
        let mut report = BootstrapReport::default();
        while let Some(joined) = tasks.join_next().await {
            let (task, result) =
                joined.map_err(|e| SkypeError::Bootstrap(format!("Bootstrap task did not complete: {}", e)))?;
            match result {
                Ok(()) => {
                    debug!("Bootstrap task {} done", task);
                    report.completed.push(task);
                }
                Err(e) => {
                    let source = match task {
                        BootstrapTask::PushChannel => ErrorSource::RegisteringPushChannel,
                        _ => ErrorSource::BootstrapTask,
                    };
                    client.error_handler.handle(source, &e);
                    report.failures.push((task, e));
                }
            }
        }
        Ok::<_, SkypeError>(report)
    };

    let report = match tokio::time::timeout(deadline, collect).await {
        Ok(report) => report?,
        Err(_) => {
            error!("Session bootstrap did not finish within {:?}", deadline);
            return Err(SkypeError::Bootstrap(format!(
                "did not finish within {:?}",
                deadline
            )));
        }
    };

    info!(
        "Session bootstrap finished: {} ok, {} failed",
        report.completed.len(),
        report.failures.len()
    );
    Ok(report)
}
