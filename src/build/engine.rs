//! The fixed-point build loop.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::element::{Element, MountedArena, MountedId};
use crate::error::{BuildError, Result};
use crate::message::Message;
use crate::observe::{ObservationMap, ObserverQuery};
use crate::style::{MatchRegistry, OverrideContext, StyleSheet};

use super::context::BuildContext;
use super::state::ComponentStateStore;
use super::tree::{FinalNode, FinalTree};

/// Diagnostic observer receiving every interim tree.
///
/// Invoked once per completed pass; not part of the algorithm's
/// correctness.
pub type Recorder = Arc<dyn Fn(u32, &FinalTree) + Send + Sync>;

/// Options controlling one build.
#[derive(Clone)]
pub struct BuildOptions {
    max_iterations: u32,
    deploy: bool,
    observations: ObservationMap,
    recorder: Option<Recorder>,
}

/// Result of a build.
#[derive(Debug)]
pub struct BuildOutput {
    /// The final primitive tree; `None` if the root built to nothing.
    pub final_tree: Option<FinalTree>,
    /// Arena of elements mounted during the last pass.
    pub mounted: MountedArena,
    /// Collected messages (component build errors).
    pub messages: Vec<Message>,
    /// True if one or more components failed to build.
    pub partial: bool,
    /// Every observer query registered during the last pass.
    pub executed_queries: HashMap<String, Vec<ObserverQuery>>,
    /// Queries the observation cache could not answer.
    pub needs_data: HashMap<String, Vec<ObserverQuery>>,
    /// Number of passes the fixed point took.
    pub iterations: u32,
}

/// Reduces element trees to final primitive trees.
#[derive(Debug, Default)]
pub struct BuildEngine {
    state: ComponentStateStore,
}

impl BuildOptions {
    /// Default pass cap converting state-mutation loops into errors.
    pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

    /// Creates options for a tolerant (preview) build.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_iterations: Self::DEFAULT_MAX_ITERATIONS,
            deploy: false,
            observations: ObservationMap::new(),
            recorder: None,
        }
    }

    /// Creates options for a deploy build (partial results are fatal).
    #[must_use]
    pub fn deploy() -> Self {
        Self {
            deploy: true,
            ..Self::new()
        }
    }

    /// Sets the pass cap.
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: u32) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Supplies fulfilled observations for observer-backed components.
    #[must_use]
    pub fn with_observations(mut self, observations: ObservationMap) -> Self {
        self.observations = observations;
        self
    }

    /// Attaches a diagnostic recorder.
    #[must_use]
    pub fn with_recorder(mut self, recorder: Recorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Returns true if partial builds are promoted to hard errors.
    #[must_use]
    pub const fn is_deploy(&self) -> bool {
        self.deploy
    }
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BuildOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BuildOptions")
            .field("max_iterations", &self.max_iterations)
            .field("deploy", &self.deploy)
            .field("observations", &self.observations.len())
            .field("recorder", &self.recorder.is_some())
            .finish()
    }
}

impl BuildEngine {
    /// Creates an engine with empty component state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an engine resuming from a state snapshot.
    #[must_use]
    pub const fn with_state(state: ComponentStateStore) -> Self {
        Self { state }
    }

    /// Returns the shared component state store.
    #[must_use]
    pub const fn state(&self) -> &ComponentStateStore {
        &self.state
    }

    /// Builds the element tree to its final primitive form.
    ///
    /// Repeats full passes until no component mutates its local state,
    /// then returns the last pass's tree and bookkeeping.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::NonTerminating`] if the fixed point is not
    /// reached within the pass cap, and [`BuildError::PartialBuild`] if
    /// a component failed and the options demand a deploy build.
    pub fn build(
        &self,
        root: &Element,
        sheet: &StyleSheet,
        options: &BuildOptions,
    ) -> Result<BuildOutput> {
        let mut iterations = 0u32;
        loop {
            iterations += 1;
            if iterations > options.max_iterations {
                return Err(BuildError::NonTerminating {
                    iterations: options.max_iterations,
                }
                .into());
            }

            let mut pass = Pass {
                arena: MountedArena::new(),
                registry: MatchRegistry::new(),
                executed_queries: HashMap::new(),
                needs_data: HashMap::new(),
                errors: Vec::new(),
                state_changed: false,
                sheet,
                options,
                state: &self.state,
            };

            let root_key = root.mount_key(0);
            let built = pass.build_node(root.clone(), None, &root_key)?;
            let tree = built.map(|node| FinalTree { root: node });

            if let (Some(recorder), Some(interim)) = (&options.recorder, &tree) {
                (recorder.as_ref())(iterations, interim);
            }

            debug!(
                pass = iterations,
                state_changed = pass.state_changed,
                errors = pass.errors.len(),
                "Build pass complete"
            );

            if pass.state_changed {
                continue;
            }

            let partial = !pass.errors.is_empty();
            if partial {
                warn!("Build produced {} component error(s)", pass.errors.len());
                if options.deploy {
                    return Err(BuildError::PartialBuild {
                        errors: pass.errors,
                    }
                    .into());
                }
            }

            let messages = pass.errors.iter().map(Message::error).collect();
            return Ok(BuildOutput {
                final_tree: tree,
                mounted: pass.arena,
                messages,
                partial,
                executed_queries: pass.executed_queries,
                needs_data: pass.needs_data,
                iterations,
            });
        }
    }
}

struct Pass<'a> {
    arena: MountedArena,
    registry: MatchRegistry,
    executed_queries: HashMap<String, Vec<ObserverQuery>>,
    needs_data: HashMap<String, Vec<ObserverQuery>>,
    errors: Vec<String>,
    state_changed: bool,
    sheet: &'a StyleSheet,
    options: &'a BuildOptions,
    state: &'a ComponentStateStore,
}

impl Pass<'_> {
    /// Drives one element to a primitive, then recurses into children.
    ///
    /// Returns `Ok(None)` when the element builds to nothing or its
    /// component failed (the failure is collected, not propagated).
    fn build_node(
        &mut self,
        element: Element,
        parent: Option<MountedId>,
        key: &str,
    ) -> Result<Option<FinalNode>> {
        let mut mounted = self.arena.mount(element, parent, key);
        let mut hops = 0u32;

        loop {
            let path = self.arena.path(mounted);

            // Style overrides first; a replacement is re-evaluated
            // before any expansion or descent.
            if let Some(rule_id) = self.sheet.first_match(&path, &self.arena, &self.registry) {
                self.registry.mark_matched(mounted, rule_id);
                let rule = self.sheet.rule(rule_id);
                let (snapshot, id) = self.snapshot(mounted);
                let ctx = OverrideContext {
                    element: &snapshot,
                    id: &id,
                    path: &path,
                };
                match rule.apply(&ctx) {
                    Ok(Some(replacement)) => {
                        hops += 1;
                        if hops > self.options.max_iterations {
                            return Err(BuildError::NonTerminating {
                                iterations: self.options.max_iterations,
                            }
                            .into());
                        }
                        let successor = self.arena.mount_successor(replacement, mounted);
                        if rule.rematches() {
                            self.registry.copy_matches_except(mounted, successor, rule_id);
                        } else {
                            self.registry.copy_matches(mounted, successor);
                        }
                        mounted = successor;
                        continue;
                    }
                    Ok(None) => continue,
                    Err(err) => {
                        self.fail(&id, &snapshot, &err.to_string());
                        return Ok(None);
                    }
                }
            }

            // Expand composites until a primitive remains.
            let component = self.arena.get(mounted).element.component().clone();
            let Some(build_fn) = component.build_fn() else {
                break;
            };

            hops += 1;
            if hops > self.options.max_iterations {
                return Err(BuildError::NonTerminating {
                    iterations: self.options.max_iterations,
                }
                .into());
            }

            let (snapshot, id) = self.snapshot(mounted);
            let mut ctx = BuildContext::new(
                &snapshot,
                &id,
                self.state,
                &self.options.observations,
                &mut self.executed_queries,
                &mut self.needs_data,
                &mut self.state_changed,
            );
            match (build_fn.as_ref())(&mut ctx) {
                Ok(Some(subtree)) => {
                    mounted = self.arena.mount_successor(subtree, mounted);
                }
                Ok(None) => return Ok(None),
                Err(err) => {
                    self.fail(&id, &snapshot, &err.to_string());
                    return Ok(None);
                }
            }
        }

        let node = self.arena.get(mounted).clone();
        self.arena.register_handle(node.id.clone(), mounted);

        let mut children = Vec::new();
        for (ordinal, child) in node.element.children().iter().enumerate() {
            let child_key = child.mount_key(ordinal);
            if let Some(built) = self.build_node(child.clone(), Some(mounted), &child_key)? {
                children.push(built);
            }
        }

        Ok(Some(FinalNode {
            component: node.element.component().name().to_string(),
            id: node.id,
            key: key.to_string(),
            props: node.element.props().clone(),
            children,
            trivial: node.element.component().is_trivial_when_deployed(),
        }))
    }

    fn snapshot(&self, mounted: MountedId) -> (Element, String) {
        let node = self.arena.get(mounted);
        (node.element.clone(), node.id.clone())
    }

    fn fail(&mut self, id: &str, element: &Element, message: &str) {
        let text = format!(
            "{} ({id}): {message}",
            element.component().name()
        );
        warn!("Component build failed: {text}");
        self.errors.push(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ComponentType;
    use crate::error::CambiumError;
    use crate::style::{Rule, TypeScope};
    use serde_json::{Value, json};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn container() -> ComponentType {
        ComponentType::primitive("Container")
    }

    #[test]
    fn test_primitive_tree_passthrough() {
        let ty = container();
        let root = Element::new(ty.clone())
            .with_key("root")
            .with_child(Element::new(ty.clone()).with_key("web"))
            .with_child(Element::new(ty).with_key("db"));

        let engine = BuildEngine::new();
        let output = engine
            .build(&root, &StyleSheet::new(), &BuildOptions::new())
            .unwrap();

        let tree = output.final_tree.unwrap();
        assert_eq!(tree.node_ids(), vec!["/root", "/root/web", "/root/db"]);
        assert_eq!(output.iterations, 1);
        assert!(!output.partial);
    }

    #[test]
    fn test_composite_expansion() {
        let ty = container();
        let leaf = ty.clone();
        let app = ComponentType::composite("App", move |ctx| {
            let replicas = ctx
                .props()
                .get("replicas")
                .and_then(|v| v.as_json())
                .and_then(Value::as_u64)
                .unwrap_or(1);
            let children = (0..replicas)
                .map(|i| Element::new(leaf.clone()).with_key(format!("c{i}")))
                .collect();
            Ok(Some(
                Element::new(container()).with_children(children),
            ))
        });

        let root = Element::new(app)
            .with_key("root")
            .with_prop("replicas", json!(2));
        let engine = BuildEngine::new();
        let output = engine
            .build(&root, &StyleSheet::new(), &BuildOptions::new())
            .unwrap();

        let tree = output.final_tree.unwrap();
        assert_eq!(tree.node_ids(), vec!["/root", "/root/c0", "/root/c1"]);
    }

    #[test]
    fn test_fixed_point_after_n_mutations() {
        const MUTATIONS: u64 = 3;
        let inner = container();
        let stateful = ComponentType::composite("Stateful", move |ctx| {
            let count = ctx.state().as_u64().unwrap_or(0);
            if count < MUTATIONS {
                ctx.set_state(json!(count + 1));
            }
            Ok(Some(Element::new(inner.clone()).with_key("leaf")))
        });

        let root = Element::new(stateful).with_key("root");
        let engine = BuildEngine::new();
        let output = engine
            .build(&root, &StyleSheet::new(), &BuildOptions::new())
            .unwrap();

        // One pass per mutation plus the quiescent pass.
        assert_eq!(u64::from(output.iterations), MUTATIONS + 1);
        assert!(output.final_tree.is_some());
    }

    #[test]
    fn test_non_terminating_build() {
        let inner = container();
        let runaway = ComponentType::composite("Runaway", move |ctx| {
            let count = ctx.state().as_u64().unwrap_or(0);
            ctx.set_state(json!(count + 1));
            Ok(Some(Element::new(inner.clone()).with_key("leaf")))
        });

        let root = Element::new(runaway).with_key("root");
        let engine = BuildEngine::new();
        let err = engine
            .build(
                &root,
                &StyleSheet::new(),
                &BuildOptions::new().with_max_iterations(5),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            CambiumError::Build(BuildError::NonTerminating { iterations: 5 })
        ));
    }

    #[test]
    fn test_no_double_match_single_invocation() {
        let ty = container();
        let scope = TypeScope::new().with(ty.clone());
        let invocations = Arc::new(AtomicU32::new(0));

        let counted = Arc::clone(&invocations);
        let replacement_ty = ty.clone();
        let sheet = StyleSheet::new().with_rule(
            Rule::parse("Container", &scope, move |_ctx| {
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(Some(
                    Element::new(replacement_ty.clone()).with_prop("styled", "true"),
                ))
            })
            .unwrap(),
        );

        let root = Element::new(ty).with_key("root");
        let engine = BuildEngine::new();
        let output = engine
            .build(&root, &sheet, &BuildOptions::new())
            .unwrap();

        // The rule produced a Container replacement it would match
        // again; no-rematch propagation must keep it to one call.
        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        let tree = output.final_tree.unwrap();
        assert_eq!(
            tree.root.props.get("styled").and_then(|p| p.as_str()),
            Some("true")
        );
    }

    #[test]
    fn test_rule_chain_on_fresh_instance() {
        let ty = container();
        let scope = TypeScope::new().with(ty.clone());

        let first_ty = ty.clone();
        let second_ty = ty.clone();
        let sheet = StyleSheet::new()
            .with_rule(
                Rule::parse("Container", &scope, move |ctx| {
                    let mut replacement = Element::new(first_ty.clone()).with_prop("first", "yes");
                    for (name, value) in ctx.element.props() {
                        replacement = replacement.with_prop(name.clone(), value.clone());
                    }
                    Ok(Some(replacement))
                })
                .unwrap(),
            )
            .with_rule(
                Rule::parse("Container[first=yes]", &scope, move |ctx| {
                    let mut replacement =
                        Element::new(second_ty.clone()).with_prop("second", "yes");
                    for (name, value) in ctx.element.props() {
                        replacement = replacement.with_prop(name.clone(), value.clone());
                    }
                    Ok(Some(replacement))
                })
                .unwrap(),
            );

        let root = Element::new(ty).with_key("root");
        let engine = BuildEngine::new();
        let output = engine.build(&root, &sheet, &BuildOptions::new()).unwrap();

        // Rule 0 matched the original, rule 1 matched the fresh
        // replacement instance.
        let tree = output.final_tree.unwrap();
        assert_eq!(tree.root.props.get("first").and_then(|p| p.as_str()), Some("yes"));
        assert_eq!(tree.root.props.get("second").and_then(|p| p.as_str()), Some("yes"));
    }

    #[test]
    fn test_rematch_escape_hatch() {
        let ty = container();
        let scope = TypeScope::new().with(ty.clone());
        let invocations = Arc::new(AtomicU32::new(0));

        // Opting out of no-rematch lets the rule reapply to its own
        // output until it stops replacing.
        let counted = Arc::clone(&invocations);
        let replacement_ty = ty.clone();
        let sheet = StyleSheet::new().with_rule(
            Rule::parse("Container", &scope, move |ctx| {
                let generation = ctx
                    .element
                    .prop("generation")
                    .and_then(|p| p.as_json())
                    .and_then(Value::as_u64)
                    .unwrap_or(0);
                if generation >= 3 {
                    return Ok(None);
                }
                counted.fetch_add(1, Ordering::SeqCst);
                Ok(Some(
                    Element::new(replacement_ty.clone())
                        .with_prop("generation", json!(generation + 1)),
                ))
            })
            .unwrap()
            .with_rematch(true),
        );

        let root = Element::new(ty).with_key("root");
        let engine = BuildEngine::new();
        let output = engine.build(&root, &sheet, &BuildOptions::new()).unwrap();

        assert_eq!(invocations.load(Ordering::SeqCst), 3);
        let tree = output.final_tree.unwrap();
        assert_eq!(
            tree.root.props.get("generation").and_then(|p| p.as_json()),
            Some(&json!(3))
        );
    }

    #[test]
    fn test_partial_build_tolerated_in_preview() {
        let ty = container();
        let broken = ComponentType::composite("Broken", |_ctx| {
            Err(CambiumError::internal("boom"))
        });

        let root = Element::new(ty)
            .with_key("root")
            .with_child(Element::new(broken).with_key("bad"));

        let engine = BuildEngine::new();
        let output = engine
            .build(&root, &StyleSheet::new(), &BuildOptions::new())
            .unwrap();
        assert!(output.partial);
        assert_eq!(output.messages.len(), 1);
        // The failed subtree is absent; the rest of the tree survives.
        assert_eq!(output.final_tree.unwrap().node_ids(), vec!["/root"]);
    }

    #[test]
    fn test_partial_build_fatal_in_deploy() {
        let broken = ComponentType::composite("Broken", |_ctx| {
            Err(CambiumError::internal("boom"))
        });
        let root = Element::new(broken).with_key("root");

        let engine = BuildEngine::new();
        let err = engine
            .build(&root, &StyleSheet::new(), &BuildOptions::deploy())
            .unwrap_err();
        assert!(matches!(
            err,
            CambiumError::Build(BuildError::PartialBuild { .. })
        ));
    }

    #[test]
    fn test_observer_queries_collected() {
        let inner = container();
        let watcher = ComponentType::composite("Watcher", move |ctx| {
            let element = match ctx.observe("dns", "lookup db.internal") {
                Some(data) => {
                    let addr = data.as_str().unwrap_or("unknown");
                    Element::new(inner.clone()).with_prop("addr", addr)
                }
                None => Element::new(inner.clone()).with_prop("addr", "pending"),
            };
            Ok(Some(element))
        });

        let root = Element::new(watcher).with_key("root");
        let engine = BuildEngine::new();

        // Without data the query lands in needs_data.
        let output = engine
            .build(&root, &StyleSheet::new(), &BuildOptions::new())
            .unwrap();
        assert_eq!(output.needs_data["dns"].len(), 1);
        assert_eq!(output.executed_queries["dns"].len(), 1);
        let tree = output.final_tree.unwrap();
        assert_eq!(tree.root.props.get("addr").and_then(|p| p.as_str()), Some("pending"));

        // Replaying the observation fulfills the query.
        let mut observations = ObservationMap::new();
        observations.insert(
            String::from("dns"),
            json!({ "lookup db.internal": "10.0.0.7" }),
        );
        let output = engine
            .build(
                &root,
                &StyleSheet::new(),
                &BuildOptions::new().with_observations(observations),
            )
            .unwrap();
        assert!(output.needs_data.is_empty());
        let tree = output.final_tree.unwrap();
        assert_eq!(tree.root.props.get("addr").and_then(|p| p.as_str()), Some("10.0.0.7"));
    }

    #[test]
    fn test_recorder_sees_every_pass() {
        let inner = container();
        let stateful = ComponentType::composite("Stateful", move |ctx| {
            if ctx.state().is_null() {
                ctx.set_state(json!("ready"));
            }
            Ok(Some(Element::new(inner.clone()).with_key("leaf")))
        });

        let recorded: Arc<Mutex<Vec<u32>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&recorded);
        let recorder: Recorder = Arc::new(move |pass, _tree| {
            sink.lock().unwrap().push(pass);
        });

        let root = Element::new(stateful).with_key("root");
        let engine = BuildEngine::new();
        engine
            .build(
                &root,
                &StyleSheet::new(),
                &BuildOptions::new().with_recorder(recorder),
            )
            .unwrap();

        assert_eq!(*recorded.lock().unwrap(), vec![1, 2]);
    }
}
