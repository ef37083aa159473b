//! 会话：独占引擎的 tokio 任务。
//!
//! 句柄命令、到期的延迟发生与自动模式的节拍都由同一个 `select!` 循环处理，
//! 彼此不会交错。观察者从 `watch` 通道读取 [`EngineSnapshot`]，
//! 从 `broadcast` 通道读取 [`EngineEvent`]，两者都只在一次修改完成后发布。
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::engine::{Engine, EngineError, EngineEvent, EngineSnapshot};
use crate::irrigation::StateUpdate;

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;
/// 没有待执行的延迟发生时使用的占位等待时间。
const IDLE_WAIT: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session has shut down")]
    Closed,
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// 一次修改的结果，以及在同一轮处理中紧随其后取得的快照。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied<T> {
    pub value: T,
    pub snapshot: EngineSnapshot,
}

#[derive(Debug)]
enum Command {
    Fire {
        transition: String,
        reply: oneshot::Sender<Applied<bool>>,
    },
    FireAll {
        reply: oneshot::Sender<Applied<usize>>,
    },
    StartAllPumps {
        reply: oneshot::Sender<Applied<usize>>,
    },
    UpdateState {
        update: StateUpdate,
        reply: oneshot::Sender<EngineSnapshot>,
    },
    Reset {
        zones: usize,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Snapshot {
        reply: oneshot::Sender<EngineSnapshot>,
    },
    Export {
        reply: oneshot::Sender<String>,
    },
    Shutdown,
}

pub struct Session {
    engine: Engine,
    commands: mpsc::Receiver<Command>,
    snapshots: watch::Sender<EngineSnapshot>,
    events: broadcast::Sender<EngineEvent>,
}

impl Session {
    /// 把 `engine` 移入新任务。句柄请求关闭或全部句柄被丢弃时任务结束，
    /// 取消全部定时器后交还引擎。
    pub fn spawn(engine: Engine) -> (SessionHandle, JoinHandle<Engine>) {
        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (snapshot_tx, snapshot_rx) = watch::channel(engine.snapshot());
        let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

        let session = Session {
            engine,
            commands: command_rx,
            snapshots: snapshot_tx,
            events: event_tx.clone(),
        };
        let handle = SessionHandle {
            commands: command_tx,
            snapshots: snapshot_rx,
            events: event_tx,
        };
        (handle, tokio::spawn(session.run()))
    }

    async fn run(mut self) -> Engine {
        let period = self.engine.config().timing.auto_period();
        let mut auto = tokio::time::interval_at(Instant::now() + period, period);
        auto.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let deadline = self.engine.next_deadline();
            let wake_at = deadline.unwrap_or_else(|| Instant::now() + IDLE_WAIT);
            let auto_mode = self.engine.state().auto_mode;

            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = tokio::time::sleep_until(wake_at), if deadline.is_some() => {
                    let fired = self.engine.run_due(Instant::now());
                    log::trace!("timer wake-up fired {} transitions", fired);
                }
                _ = auto.tick(), if auto_mode => {
                    let fired = self.engine.fire_all_enabled();
                    log::debug!("auto mode fired {} transitions", fired);
                }
            }
            self.publish();
        }

        self.engine.shutdown();
        self.publish();
        self.engine
    }

    fn handle(&mut self, command: Command) {
        // 接收端被丢弃只说明调用方不再等待
        match command {
            Command::Fire { transition, reply } => {
                let fired = self.engine.fire(&transition);
                let _ = reply.send(self.applied(fired));
            }
            Command::FireAll { reply } => {
                let fired = self.engine.fire_all_enabled();
                let _ = reply.send(self.applied(fired));
            }
            Command::StartAllPumps { reply } => {
                let started = self.engine.start_all_pumps();
                let _ = reply.send(self.applied(started));
            }
            Command::UpdateState { update, reply } => {
                self.engine.update_state(update);
                let _ = reply.send(self.engine.snapshot());
            }
            Command::Reset { zones, reply } => {
                let _ = reply.send(self.engine.reset(zones));
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.engine.snapshot());
            }
            Command::Export { reply } => {
                let _ = reply.send(self.engine.export_document());
            }
            Command::Shutdown => {}
        }
    }

    fn applied<T>(&self, value: T) -> Applied<T> {
        Applied {
            value,
            snapshot: self.engine.snapshot(),
        }
    }

    fn publish(&mut self) {
        for event in self.engine.drain_events() {
            // 没有订阅者时丢弃
            let _ = self.events.send(event);
        }
        let snapshot = self.engine.snapshot();
        self.snapshots.send_if_modified(|current| {
            if *current == snapshot {
                false
            } else {
                *current = snapshot;
                true
            }
        });
    }
}

/// 运行中 [`Session`] 的可克隆前端。
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    snapshots: watch::Receiver<EngineSnapshot>,
    events: broadcast::Sender<EngineEvent>,
}

impl SessionHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SessionError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| SessionError::Closed)?;
        response.await.map_err(|_| SessionError::Closed)
    }

    pub async fn fire(&self, transition: impl Into<String>) -> Result<bool, SessionError> {
        Ok(self.fire_with_snapshot(transition).await?.value)
    }

    /// 与 [`SessionHandle::fire`] 相同，另附发生后立即取得的快照；
    /// 其间不会有到期的延迟发生插入。
    pub async fn fire_with_snapshot(
        &self,
        transition: impl Into<String>,
    ) -> Result<Applied<bool>, SessionError> {
        let transition = transition.into();
        self.request(|reply| Command::Fire { transition, reply }).await
    }

    pub async fn fire_all_enabled(&self) -> Result<usize, SessionError> {
        Ok(self.fire_all_with_snapshot().await?.value)
    }

    pub async fn fire_all_with_snapshot(&self) -> Result<Applied<usize>, SessionError> {
        self.request(|reply| Command::FireAll { reply }).await
    }

    pub async fn start_all_pumps(&self) -> Result<usize, SessionError> {
        Ok(self.start_all_pumps_with_snapshot().await?.value)
    }

    pub async fn start_all_pumps_with_snapshot(&self) -> Result<Applied<usize>, SessionError> {
        self.request(|reply| Command::StartAllPumps { reply }).await
    }

    /// 合并外部状态，返回合并后的快照。
    pub async fn update_state(&self, update: StateUpdate) -> Result<EngineSnapshot, SessionError> {
        self.request(|reply| Command::UpdateState { update, reply })
            .await
    }

    pub async fn reset(&self, zones: usize) -> Result<(), SessionError> {
        self.request(|reply| Command::Reset { zones, reply })
            .await?
            .map_err(SessionError::from)
    }

    /// 由会话自身在处理完此前排队的命令后取得的快照。
    pub async fn snapshot(&self) -> Result<EngineSnapshot, SessionError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    pub async fn export_document(&self) -> Result<String, SessionError> {
        self.request(|reply| Command::Export { reply }).await
    }

    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| SessionError::Closed)
    }

    /// 最近一次发布的快照，不经过会话往返。
    pub fn latest(&self) -> EngineSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<EngineSnapshot> {
        self.snapshots.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }
}
