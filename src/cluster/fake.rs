//! In-memory stand-ins for the cluster API and the CLI tools

use crate::domain::ports::{CommandOutput, CommandRunner, ResourceApi};
use crate::error::Result;
use async_trait::async_trait;
use kube::core::ErrorResponse;
use kube::{Resource, ResourceExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, VecDeque};

pub fn api_error(code: u16, reason: &str, message: &str) -> kube::Error {
    kube::Error::Api(ErrorResponse {
        status: "Failure".to_string(),
        message: message.to_string(),
        reason: reason.to_string(),
        code,
    })
}

fn not_found(name: &str) -> kube::Error {
    api_error(404, "NotFound", &format!("\"{}\" not found", name))
}

// =============================================================================
// Fake Resource API
// =============================================================================

type GetHook<K> = Box<dyn FnMut(&mut K) + Send>;

struct FakeState<K> {
    objects: BTreeMap<String, K>,
    errors: BTreeMap<&'static str, VecDeque<kube::Error>>,
    on_get: Option<GetHook<K>>,
    deletion_lag: usize,
    terminating: BTreeMap<String, usize>,
    calls: BTreeMap<&'static str, usize>,
    patches: Vec<serde_json::Value>,
}

/// Object store keyed by name with scripted failures.
///
/// `on_get` runs against the stored object before each successful get, which
/// is how tests play the part of the controllers moving status forward.
pub struct FakeApi<K> {
    state: Mutex<FakeState<K>>,
}

impl<K> Default for FakeApi<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(FakeState {
                objects: BTreeMap::new(),
                errors: BTreeMap::new(),
                on_get: None,
                deletion_lag: 0,
                terminating: BTreeMap::new(),
                calls: BTreeMap::new(),
                patches: Vec::new(),
            }),
        }
    }
}

impl<K: Resource + Clone> FakeApi<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_object(self, obj: K) -> Self {
        self.insert(obj);
        self
    }

    pub fn insert(&self, obj: K) {
        self.state.lock().objects.insert(obj.name_any(), obj);
    }

    /// Fail the next call of `op` ("create", "get", "delete", "patch", "list")
    pub fn fail_next(&self, op: &'static str, err: kube::Error) {
        self.state.lock().errors.entry(op).or_default().push_back(err);
    }

    pub fn on_get(&self, hook: impl FnMut(&mut K) + Send + 'static) {
        self.state.lock().on_get = Some(Box::new(hook));
    }

    /// Number of gets a deleted object stays visible for
    pub fn set_deletion_lag(&self, gets: usize) {
        self.state.lock().deletion_lag = gets;
    }

    pub fn calls(&self, op: &str) -> usize {
        self.state.lock().calls.get(op).copied().unwrap_or(0)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.state.lock().objects.contains_key(name)
    }

    pub fn object(&self, name: &str) -> Option<K> {
        self.state.lock().objects.get(name).cloned()
    }

    pub fn patches(&self) -> Vec<serde_json::Value> {
        self.state.lock().patches.clone()
    }

    fn begin(&self, op: &'static str) -> std::result::Result<(), kube::Error> {
        let mut state = self.state.lock();
        *state.calls.entry(op).or_default() += 1;
        match state.errors.get_mut(op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

fn labels_match<K: Resource>(obj: &K, selector: &str) -> bool {
    let labels = obj.labels();
    selector
        .split(',')
        .filter(|s| !s.is_empty())
        .all(|pair| match pair.split_once('=') {
            Some((k, v)) => labels.get(k).map(|l| l == v).unwrap_or(false),
            None => labels.contains_key(pair),
        })
}

#[async_trait]
impl<K> ResourceApi<K> for FakeApi<K>
where
    K: Resource + Clone + Send + Sync + 'static,
{
    async fn create(&self, obj: &K) -> std::result::Result<K, kube::Error> {
        self.begin("create")?;
        let name = obj.name_any();
        let mut state = self.state.lock();
        if state.objects.contains_key(&name) {
            return Err(api_error(409, "AlreadyExists", &format!("\"{}\" already exists", name)));
        }
        state.objects.insert(name, obj.clone());
        Ok(obj.clone())
    }

    async fn get(&self, name: &str) -> std::result::Result<K, kube::Error> {
        self.begin("get")?;
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(remaining) = state.terminating.get_mut(name) {
            if *remaining == 0 {
                state.terminating.remove(name);
                state.objects.remove(name);
                return Err(not_found(name));
            }
            *remaining -= 1;
        }

        let obj = state.objects.get_mut(name).ok_or_else(|| not_found(name))?;
        if let Some(hook) = state.on_get.as_mut() {
            hook(obj);
        }
        Ok(obj.clone())
    }

    async fn delete(&self, name: &str) -> std::result::Result<(), kube::Error> {
        self.begin("delete")?;
        let mut state = self.state.lock();
        if !state.objects.contains_key(name) {
            return Err(not_found(name));
        }
        if state.deletion_lag == 0 {
            state.objects.remove(name);
        } else {
            let lag = state.deletion_lag;
            state.terminating.entry(name.to_string()).or_insert(lag);
        }
        Ok(())
    }

    async fn patch(&self, name: &str, patch: &serde_json::Value) -> std::result::Result<K, kube::Error> {
        self.begin("patch")?;
        let mut state = self.state.lock();
        state.patches.push(patch.clone());
        state.objects.get(name).cloned().ok_or_else(|| not_found(name))
    }

    async fn list(&self, label_selector: Option<&str>) -> std::result::Result<Vec<K>, kube::Error> {
        self.begin("list")?;
        let state = self.state.lock();
        Ok(state
            .objects
            .values()
            .filter(|o| label_selector.map(|s| labels_match(*o, s)).unwrap_or(true))
            .cloned()
            .collect())
    }
}

// =============================================================================
// Fake Command Runner
// =============================================================================

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Invocation {
    pub line: String,
    pub stdin: Option<String>,
}

struct Rule {
    pattern: String,
    outputs: VecDeque<CommandOutput>,
}

/// Answers commands whose command line contains a pattern.
///
/// Outputs for a pattern are handed out in order; the last one repeats.
#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, pattern: &str, outputs: Vec<CommandOutput>) {
        self.rules.lock().push(Rule {
            pattern: pattern.to_string(),
            outputs: outputs.into(),
        });
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.calls.lock().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls.lock().iter().filter(|c| c.line.contains(pattern)).count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, program: &str, args: &[String], stdin: Option<&str>) -> Result<CommandOutput> {
        let line = std::iter::once(program.to_string())
            .chain(args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ");
        self.calls.lock().push(Invocation {
            line: line.clone(),
            stdin: stdin.map(str::to_string),
        });

        let mut rules = self.rules.lock();
        let output = rules
            .iter_mut()
            .find(|r| line.contains(&r.pattern))
            .and_then(|rule| {
                if rule.outputs.len() > 1 {
                    rule.outputs.pop_front()
                } else {
                    rule.outputs.front().cloned()
                }
            });

        Ok(output.unwrap_or_else(|| CommandOutput::failed(127, format!("no fake response for `{}`", line))))
    }
}
