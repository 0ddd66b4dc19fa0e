//! Test-only items and configurators for exercising the scheduler.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::depgraph::{ConfigItem, Dependency};
use crate::error::ConfiguratorError;
use crate::maclookup::{MacAddr, MacLookup, NetInterface};
use crate::reconciler::{Completion, Configurator, OpContext, OpKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TestKind {
    Node,
    Unregistered,
}

impl fmt::Display for TestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Item with arbitrary dependencies on other `Node` items.
#[derive(Debug, Clone, PartialEq)]
pub struct TestItem {
    pub kind: TestKind,
    pub name: String,
    pub deps: Vec<String>,
    pub value: u32,
    pub external: bool,
}

impl TestItem {
    pub fn new(name: &str, deps: &[&str]) -> Self {
        Self {
            kind: TestKind::Node,
            name: name.to_string(),
            deps: deps.iter().map(|d| d.to_string()).collect(),
            value: 0,
            external: false,
        }
    }

    pub fn with_value(mut self, value: u32) -> Self {
        self.value = value;
        self
    }

    pub fn external(mut self) -> Self {
        self.external = true;
        self
    }

    pub fn unregistered(mut self) -> Self {
        self.kind = TestKind::Unregistered;
        self
    }
}

impl ConfigItem for TestItem {
    type Kind = TestKind;

    fn kind(&self) -> TestKind {
        self.kind
    }

    fn name(&self) -> String {
        self.name.clone()
    }

    fn external(&self) -> bool {
        self.external
    }

    fn dependencies(&self) -> Vec<Dependency<TestKind>> {
        self.deps
            .iter()
            .map(|d| Dependency::new(TestKind::Node, d.clone(), "test dependency"))
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Dispatched(OpKind, String),
    Completed(OpKind, String),
}

/// Shared log of configurator calls.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
    events: Arc<Mutex<Vec<Event>>>,
}

impl Recorder {
    pub fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn position(&self, event: &Event) -> Option<usize> {
        self.events.lock().unwrap().iter().position(|e| e == event)
    }

    pub fn dispatched(&self, kind: OpKind) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Dispatched(k, name) if k == kind => Some(name),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap().clear();
    }
}

/// Configurator whose behaviour is scripted per item name.
pub struct TestConfigurator {
    recorder: Recorder,
    recreate: bool,
    modify_supported: bool,
    defer: HashSet<String>,
    fail_create: Mutex<HashSet<String>>,
    fail_modify: HashSet<String>,
    fail_delete: HashSet<String>,
    hang: Mutex<HashSet<String>>,
    held: Arc<Mutex<Vec<Completion>>>,
    delay: Duration,
}

impl TestConfigurator {
    pub fn new(recorder: Recorder) -> Self {
        Self {
            recorder,
            recreate: false,
            modify_supported: true,
            defer: HashSet::new(),
            fail_create: Mutex::default(),
            fail_modify: HashSet::new(),
            fail_delete: HashSet::new(),
            hang: Mutex::default(),
            held: Arc::default(),
            delay: Duration::from_millis(2),
        }
    }

    pub fn recreate_on_change(mut self, recreate: bool) -> Self {
        self.recreate = recreate;
        self
    }

    pub fn without_modify(mut self) -> Self {
        self.modify_supported = false;
        self
    }

    pub fn defer(mut self, names: &[&str]) -> Self {
        self.defer.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn defer_all(mut self, names: impl IntoIterator<Item = String>) -> Self {
        self.defer.extend(names);
        self
    }

    pub fn fail_create(mut self, names: &[&str]) -> Self {
        self.fail_create
            .get_mut()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Let a previously failing create succeed from now on.
    pub fn heal(&self, name: &str) {
        self.fail_create.lock().unwrap().remove(name);
    }

    pub fn fail_modify(mut self, names: &[&str]) -> Self {
        self.fail_modify.extend(names.iter().map(|n| n.to_string()));
        self
    }

    pub fn fail_delete(mut self, names: &[&str]) -> Self {
        self.fail_delete.extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Defer these items and never complete them on our own.
    pub fn hang(mut self, names: &[&str]) -> Self {
        self.hang
            .get_mut()
            .unwrap()
            .extend(names.iter().map(|n| n.to_string()));
        self
    }

    /// Complete later operations on this item normally again.
    pub fn release(&self, name: &str) {
        self.hang.lock().unwrap().remove(name);
    }

    /// Completions held back by `hang`.
    pub fn held(&self) -> Arc<Mutex<Vec<Completion>>> {
        Arc::clone(&self.held)
    }

    fn run(&self, ctx: &OpContext, kind: OpKind, item: &TestItem, fail: bool) {
        self.recorder
            .push(Event::Dispatched(kind, item.name.clone()));
        let result = if fail {
            Err(ConfiguratorError::Command(format!("{kind} {} failed", item.name)))
        } else {
            Ok(())
        };

        if self.hang.lock().unwrap().contains(&item.name) {
            self.held.lock().unwrap().push(ctx.continue_in_background());
        } else if self.defer.contains(&item.name) {
            let done = ctx.continue_in_background();
            let recorder = self.recorder.clone();
            let name = item.name.clone();
            let delay = self.delay;
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if result.is_ok() {
                    recorder.push(Event::Completed(kind, name));
                }
                done.done(result);
            });
        } else if result.is_ok() {
            self.recorder.push(Event::Completed(kind, item.name.clone()));
        }
    }
}

#[async_trait]
impl Configurator<TestItem> for TestConfigurator {
    async fn create(&self, ctx: &OpContext, item: &TestItem) -> Result<(), ConfiguratorError> {
        let fail = self.fail_create.lock().unwrap().contains(&item.name);
        if fail && !self.defer.contains(&item.name) {
            self.recorder
                .push(Event::Dispatched(OpKind::Create, item.name.clone()));
            return Err(ConfiguratorError::Command(format!("create {} failed", item.name)));
        }
        self.run(ctx, OpKind::Create, item, fail);
        Ok(())
    }

    async fn modify(
        &self,
        ctx: &OpContext,
        _old: &TestItem,
        new: &TestItem,
    ) -> Result<(), ConfiguratorError> {
        if !self.modify_supported {
            return Err(ConfiguratorError::NotImplemented);
        }
        if self.fail_modify.contains(&new.name) {
            self.recorder
                .push(Event::Dispatched(OpKind::Modify, new.name.clone()));
            return Err(ConfiguratorError::Command(format!("modify {} failed", new.name)));
        }
        self.run(ctx, OpKind::Modify, new, false);
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext, item: &TestItem) -> Result<(), ConfiguratorError> {
        let fail = self.fail_delete.contains(&item.name);
        if fail && !self.defer.contains(&item.name) {
            self.recorder
                .push(Event::Dispatched(OpKind::Delete, item.name.clone()));
            return Err(ConfiguratorError::Command(format!("delete {} failed", item.name)));
        }
        self.run(ctx, OpKind::Delete, item, fail);
        Ok(())
    }

    fn needs_recreate(&self, _old: &TestItem, _new: &TestItem) -> bool {
        self.recreate
    }
}

/// Context for calling a configurator directly, outside of a pass.
pub fn context() -> (OpContext, mpsc::UnboundedReceiver<crate::reconciler::Finished>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (OpContext::new(0, "test".to_string(), tx), rx)
}

/// MAC lookup backed by a fixed table.
#[derive(Debug, Default)]
pub struct StaticLookup {
    interfaces: HashMap<MacAddr, String>,
}

impl StaticLookup {
    pub fn with(mac: MacAddr, name: &str) -> Self {
        let mut lookup = Self::default();
        lookup.interfaces.insert(mac, name.to_string());
        lookup
    }
}

impl MacLookup for StaticLookup {
    fn interface_by_mac(&self, mac: &MacAddr) -> Option<NetInterface> {
        self.interfaces.get(mac).map(|name| NetInterface {
            name: name.clone(),
            mac: *mac,
        })
    }
}
