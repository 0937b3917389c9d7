// Fault implementations
//
// Each fault is a short sequence of runtime calls. Randomized parameters are
// drawn from small fixed menus so runs stay comparable. In-container work is
// done with `python -c` / `sh -c` because the target images ship both.

use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, info};

use super::firewall::MetricsBlockRule;
use super::recovery::PendingStep;
use super::{ActionResult, FaultAction, FaultContext, FaultKind};
use crate::runtime::{CommandOutput, ResourceUpdate};

pub const CPU_HOG_SECONDS: [u64; 3] = [15, 25, 35];
pub const MEMORY_HOG_MB: [u64; 3] = [512, 1024, 1536];
pub const PAUSE_SECONDS: [u64; 3] = [5, 10, 15];
pub const KILL_DOWNTIME_SECONDS: [u64; 2] = [5, 10];
pub const CPU_QUOTA_PERCENT: [u32; 3] = [20, 40, 60];
pub const MEM_LIMIT_MB: [u64; 3] = [128, 256, 384];
pub const DISK_FILL_MB: [u64; 4] = [50, 75, 100, 150];
pub const DISK_FILL_PATH: &str = "/tmp/chaos_bloat.dat";
pub const DISK_FILL_CLEANUP_DELAY_SECS: u64 = 10;
pub const METRICS_BLOCK_SECS: u64 = 15;

/// Uniform pick from a non-empty menu
fn pick<T: Copy>(options: &[T]) -> T {
    options[fastrand::usize(..options.len())]
}

fn python(script: String) -> Vec<String> {
    vec!["python".to_string(), "-c".to_string(), script]
}

fn shell(script: String) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script]
}

fn cpu_burn_script(seconds: u64) -> String {
    format!(
        "import time,math\nt=time.time()+{}\nx=0\nwhile time.time()<t: x+=math.sqrt(123456)",
        seconds
    )
}

fn memory_burn_script(mb: u64, seconds: u64) -> String {
    format!(
        "import time; a=[bytearray(1024*1024) for _ in range({})]; time.sleep({})",
        mb, seconds
    )
}

fn disk_fill_script(mb: u64) -> String {
    format!(
        "chunk=b'0'*1024*1024\nwith open('{}','wb') as f:\n    for _ in range({}): f.write(chunk)",
        DISK_FILL_PATH, mb
    )
}

/// First error among the steps of a composite action
fn first_error(steps: &[&CommandOutput]) -> Option<String> {
    steps.iter().find_map(|step| step.error.clone())
}

/// One catalog entry: a fault kind bound to its dependencies
#[derive(Debug, Clone)]
pub struct Fault {
    kind: FaultKind,
    ctx: FaultContext,
}

impl Fault {
    pub fn new(kind: FaultKind, ctx: FaultContext) -> Self {
        Self { kind, ctx }
    }

    async fn exec(&self, target: &str, command: Vec<String>, detach: bool) -> CommandOutput {
        self.ctx
            .runtime
            .exec(target, &command, detach, self.ctx.exec_timeout)
            .await
    }

    async fn cpu_hog(&self, target: &str) -> ActionResult {
        let seconds = pick(&CPU_HOG_SECONDS);
        info!(container = target, seconds, "Starting CPU hog");
        let out = self.exec(target, python(cpu_burn_script(seconds)), true).await;
        ActionResult::from_command(out)
    }

    async fn memory_hog(&self, target: &str) -> ActionResult {
        let mb = self.ctx.hog_mem_mb.unwrap_or_else(|| pick(&MEMORY_HOG_MB));
        let seconds = pick(&CPU_HOG_SECONDS);
        info!(container = target, mb, seconds, "Starting memory hog");
        let out = self
            .exec(target, python(memory_burn_script(mb, seconds)), true)
            .await;
        ActionResult::from_command(out)
    }

    async fn pause_unpause(&self, target: &str) -> ActionResult {
        let runtime = &self.ctx.runtime;
        let pause = runtime.pause(target).await;
        if pause.is_ok() {
            self.ctx.recovery.register(target, PendingStep::Unpause);
        }

        let seconds = pick(&PAUSE_SECONDS);
        debug!(container = target, seconds, "Holding container paused");
        tokio::time::sleep(Duration::from_secs(seconds)).await;

        let unpause = runtime.unpause(target).await;
        self.ctx.recovery.clear(target);

        let error = first_error(&[&pause, &unpause]);
        ActionResult::new()
            .with("pause", &pause)
            .with("unpause", &unpause)
            .with("paused_secs", &seconds)
            .with_error(error)
    }

    async fn kill_restart(&self, target: &str) -> ActionResult {
        let runtime = &self.ctx.runtime;
        let kill = runtime.kill(target).await;
        if kill.is_ok() {
            self.ctx.recovery.register(target, PendingStep::Start);
        }

        let seconds = pick(&KILL_DOWNTIME_SECONDS);
        debug!(container = target, seconds, "Holding container down");
        tokio::time::sleep(Duration::from_secs(seconds)).await;

        // already stopped, so start rather than restart
        let start = runtime.start(target).await;
        self.ctx.recovery.clear(target);

        let error = first_error(&[&kill, &start]);
        ActionResult::new()
            .with("kill", &kill)
            .with("start", &start)
            .with("downtime_secs", &seconds)
            .with_error(error)
    }

    async fn update(&self, target: &str, update: ResourceUpdate) -> ActionResult {
        info!(container = target, ?update, "Lowering container limits");
        let out = self.ctx.runtime.update_resources(target, &update).await;
        ActionResult::from_command(out).with("update", &update)
    }

    async fn disk_fill(&self, target: &str) -> ActionResult {
        let mb = pick(&DISK_FILL_MB);
        info!(container = target, mb, "Filling disk");
        let create = self.exec(target, python(disk_fill_script(mb)), false).await;
        let cleanup = self
            .exec(
                target,
                shell(format!(
                    "sleep {} && rm -f {}",
                    DISK_FILL_CLEANUP_DELAY_SECS, DISK_FILL_PATH
                )),
                true,
            )
            .await;

        let error = create.error.clone();
        ActionResult::new()
            .with("create", &create)
            .with("cleanup", &cleanup)
            .with("size_mb", &mb)
            .with_error(error)
    }

    async fn metrics_block(&self, target: &str) -> ActionResult {
        let Some(port) = self.ctx.registry.port(target) else {
            return ActionResult::failed("unknown port");
        };
        let rule = MetricsBlockRule::new(port);
        info!(container = target, port, "Blocking metrics port");

        let add = self.exec(target, rule.insert_command(), false).await;
        let fallback = if add.is_ok() {
            None
        } else {
            Some(self.exec(target, rule.fallback_patch_command(), false).await)
        };
        let remove = self
            .exec(target, rule.delayed_removal_command(METRICS_BLOCK_SECS), true)
            .await;

        let error = match &fallback {
            Some(patch) if patch.error.is_some() => add.error.clone(),
            _ => None,
        };
        ActionResult::new()
            .with("iptables_add", &add)
            .with("fallback_patch", &fallback)
            .with("iptables_remove", &remove)
            .with_error(error)
    }
}

#[async_trait]
impl FaultAction for Fault {
    fn name(&self) -> &str {
        self.kind.as_str()
    }

    async fn execute(&self, target: &str) -> anyhow::Result<ActionResult> {
        let result = match self.kind {
            FaultKind::CpuHog => self.cpu_hog(target).await,
            FaultKind::MemoryHog => self.memory_hog(target).await,
            FaultKind::Pause => self.pause_unpause(target).await,
            FaultKind::Restart => ActionResult::from_command(self.ctx.runtime.restart(target).await),
            FaultKind::KillRestart => self.kill_restart(target).await,
            FaultKind::CpuQuota => {
                self.update(target, ResourceUpdate::cpu(pick(&CPU_QUOTA_PERCENT)))
                    .await
            }
            FaultKind::MemLimit => {
                self.update(target, ResourceUpdate::memory(pick(&MEM_LIMIT_MB)))
                    .await
            }
            FaultKind::DiskFill => self.disk_fill(target).await,
            FaultKind::MetricsBlock => self.metrics_block(target).await,
        };
        Ok(result)
    }
}
