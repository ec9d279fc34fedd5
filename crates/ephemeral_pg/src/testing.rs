//! In-process fakes for the runtime and probe seams.

use crate::config::ImageRef;
use crate::error::RuntimeError;
use crate::probe::QueryProbe;
use crate::runtime::{ContainerRuntime, ContainerSnapshot, ContainerSpec, HealthStatus};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::AsyncWrite;

pub const FAKE_PORT: &str = "49153";

#[derive(Default)]
struct Failures {
    image_inspect: Option<String>,
    pull: Option<String>,
    create: Option<String>,
    start: Option<String>,
    stop: Option<String>,
    remove: Option<String>,
}

struct FakeContainer {
    running: bool,
    script: VecDeque<ContainerSnapshot>,
}

#[derive(Default)]
struct State {
    images: HashSet<String>,
    containers: HashMap<String, FakeContainer>,
    health_script: Vec<ContainerSnapshot>,
    pull_chunks: Vec<Vec<u8>>,
    failures: Failures,
    operations: Vec<String>,
    inspect_count: usize,
    next_id: usize,
}

/// Simulated container runtime that records every operation.
///
/// Containers replay the configured health script one snapshot per inspect,
/// repeating the last snapshot forever. Without a script they report healthy
/// on [`FAKE_PORT`] straight away.
#[derive(Clone, Default)]
pub struct FakeRuntime {
    state: Arc<Mutex<State>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        f(&mut self.state.lock().unwrap())
    }

    pub fn add_image(&self, image: &str) {
        self.with_state(|s| s.images.insert(image.to_string()));
    }

    pub fn has_image(&self, image: &str) -> bool {
        self.with_state(|s| s.images.contains(image))
    }

    pub fn set_pull_chunks(&self, chunks: Vec<Vec<u8>>) {
        self.with_state(|s| s.pull_chunks = chunks);
    }

    pub fn set_health_script(&self, script: Vec<ContainerSnapshot>) {
        self.with_state(|s| s.health_script = script);
    }

    pub fn fail_image_inspect(&self, msg: &str) {
        self.with_state(|s| s.failures.image_inspect = Some(msg.to_string()));
    }

    pub fn fail_pull(&self, msg: &str) {
        self.with_state(|s| s.failures.pull = Some(msg.to_string()));
    }

    pub fn fail_create(&self, msg: &str) {
        self.with_state(|s| s.failures.create = Some(msg.to_string()));
    }

    pub fn fail_start(&self, msg: &str) {
        self.with_state(|s| s.failures.start = Some(msg.to_string()));
    }

    pub fn fail_stop(&self, msg: &str) {
        self.with_state(|s| s.failures.stop = Some(msg.to_string()));
    }

    pub fn fail_remove(&self, msg: &str) {
        self.with_state(|s| s.failures.remove = Some(msg.to_string()));
    }

    pub fn clear_failures(&self) {
        self.with_state(|s| s.failures = Failures::default());
    }

    /// Add a started container that follows the health script.
    pub fn insert_running_container(&self) -> String {
        self.with_state(|s| {
            let id = next_container_id(s);
            let script = s.health_script.iter().cloned().collect();
            s.containers.insert(
                id.clone(),
                FakeContainer {
                    running: true,
                    script,
                },
            );
            id
        })
    }

    pub fn container_exists(&self, id: &str) -> bool {
        self.with_state(|s| s.containers.contains_key(id))
    }

    pub fn container_count(&self) -> usize {
        self.with_state(|s| s.containers.len())
    }

    pub fn operations(&self) -> Vec<String> {
        self.with_state(|s| s.operations.clone())
    }

    pub fn inspect_count(&self) -> usize {
        self.with_state(|s| s.inspect_count)
    }
}

fn next_container_id(state: &mut State) -> String {
    state.next_id += 1;
    format!("fake-container-{}", state.next_id)
}

fn healthy_snapshot() -> ContainerSnapshot {
    ContainerSnapshot {
        health: Some(HealthStatus::Healthy),
        host_port: Some(FAKE_PORT.to_string()),
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn inspect_image(&self, image: &ImageRef) -> Result<(), RuntimeError> {
        self.with_state(|s| {
            s.operations.push(format!("inspect_image:{image}"));
            if let Some(msg) = &s.failures.image_inspect {
                return Err(RuntimeError::other(msg.clone()));
            }
            if s.images.contains(&image.to_string()) {
                Ok(())
            } else {
                Err(RuntimeError::not_found(format!("No such image: {image}")))
            }
        })
    }

    fn pull_image<'a>(&'a self, image: &'a ImageRef) -> BoxStream<'a, Result<Vec<u8>, RuntimeError>> {
        let items: Vec<Result<Vec<u8>, RuntimeError>> = self.with_state(|s| {
            s.operations.push(format!("pull:{image}"));
            if let Some(msg) = &s.failures.pull {
                return vec![Err(RuntimeError::other(msg.clone()))];
            }
            s.images.insert(image.to_string());
            s.pull_chunks.iter().cloned().map(Ok).collect()
        });
        stream::iter(items).boxed()
    }

    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        self.with_state(|s| {
            s.operations.push(format!("create:{}", spec.image));
            if let Some(msg) = &s.failures.create {
                return Err(RuntimeError::other(msg.clone()));
            }
            let id = next_container_id(s);
            let script = s.health_script.iter().cloned().collect();
            s.containers.insert(
                id.clone(),
                FakeContainer {
                    running: false,
                    script,
                },
            );
            Ok(id)
        })
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.with_state(|s| {
            s.operations.push(format!("start:{id}"));
            if let Some(msg) = &s.failures.start {
                return Err(RuntimeError::other(msg.clone()));
            }
            let container = s
                .containers
                .get_mut(id)
                .ok_or_else(|| RuntimeError::not_found(id))?;
            container.running = true;
            Ok(())
        })
    }

    async fn inspect_container(&self, id: &str) -> Result<ContainerSnapshot, RuntimeError> {
        self.with_state(|s| {
            s.inspect_count += 1;
            let container = s
                .containers
                .get_mut(id)
                .ok_or_else(|| RuntimeError::not_found(id))?;
            let snapshot = if container.script.len() > 1 {
                container.script.pop_front()
            } else {
                container.script.front().cloned()
            };
            Ok(snapshot.unwrap_or_else(healthy_snapshot))
        })
    }

    async fn stop_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.with_state(|s| {
            s.operations.push(format!("stop:{id}"));
            if let Some(msg) = &s.failures.stop {
                return Err(RuntimeError::other(msg.clone()));
            }
            let container = s
                .containers
                .get_mut(id)
                .ok_or_else(|| RuntimeError::not_found(id))?;
            container.running = false;
            Ok(())
        })
    }

    async fn remove_container(&self, id: &str, force: bool) -> Result<(), RuntimeError> {
        self.with_state(|s| {
            if force {
                s.operations.push(format!("remove:{id}:force"));
            } else {
                s.operations.push(format!("remove:{id}"));
            }
            if let Some(msg) = &s.failures.remove {
                return Err(RuntimeError::other(msg.clone()));
            }
            let running = s
                .containers
                .get(id)
                .map(|c| c.running)
                .ok_or_else(|| RuntimeError::not_found(id))?;
            if running && !force {
                return Err(RuntimeError::other(format!(
                    "cannot remove running container {id}"
                )));
            }
            s.containers.remove(id);
            Ok(())
        })
    }
}

/// Probe that fails a fixed number of times before succeeding.
#[derive(Default)]
pub struct ScriptedProbe {
    /// `None` means the database never becomes ready.
    fail_times: Option<usize>,
    urls: Mutex<Vec<String>>,
}

impl ScriptedProbe {
    pub fn ready() -> Self {
        Self::failing_times(0)
    }

    pub fn failing_times(n: usize) -> Self {
        Self {
            fail_times: Some(n),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn never_ready() -> Self {
        Self::default()
    }

    pub fn attempts(&self) -> usize {
        self.urls.lock().unwrap().len()
    }

    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryProbe for ScriptedProbe {
    async fn probe(&self, url: &str) -> Result<(), sqlx::Error> {
        let attempt = {
            let mut urls = self.urls.lock().unwrap();
            urls.push(url.to_string());
            urls.len()
        };
        match self.fail_times {
            Some(n) if attempt > n => Ok(()),
            _ => Err(sqlx::Error::Protocol(format!(
                "the database system is starting up (attempt {attempt})"
            ))),
        }
    }
}

/// Progress sink whose contents stay readable after being boxed.
#[derive(Clone, Default)]
pub struct SharedSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl SharedSink {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.buf.lock().unwrap()).into_owned()
    }
}

impl AsyncWrite for SharedSink {
    fn poll_write(self: Pin<&mut Self>, _cx: &mut Context<'_>, data: &[u8]) -> Poll<io::Result<usize>> {
        self.buf.lock().unwrap().extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
