//! Scope frames and closures.
//!
//! Every call gets a fresh [`Scope`] whose parent is the scope its closure
//! captured when it was created. Scopes live in an arena and refer to each
//! other by [`ScopeId`], so a closure holding its defining scope never forms
//! an ownership cycle with the values stored in that scope.
//!
//! A scope that no closure ever captured cannot be reached once its call
//! returns; [`Scopes::release`] recycles such slots. Captured scopes are
//! reclaimed by [`Scopes::collect`], a mark-and-sweep over the arena.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

use crate::ast::Command;
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(u32);

impl ScopeId {
    pub const GLOBAL: ScopeId = ScopeId(0);

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A function value: shared parameters and body plus the scope it closes over.
pub struct Closure {
    pub name: Rc<str>,
    pub params: Rc<[String]>,
    pub body: Rc<[Command]>,
    pub scope: ScopeId,
    /// Shared with the captured scope; its count tells the collector how
    /// many closures still point there.
    anchor: Rc<()>,
}

impl fmt::Debug for Closure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({}) in {}", self.name, self.params.join(","), self.scope)
    }
}

#[derive(Debug)]
pub struct Scope {
    pub function: Rc<str>,
    pub vars: HashMap<String, Value>,
    pub defs: HashMap<String, Rc<Closure>>,
    pub parent: Option<ScopeId>,
    captured: bool,
    anchor: Rc<()>,
}

impl Scope {
    fn new(function: Rc<str>, parent: Option<ScopeId>) -> Self {
        Self {
            function,
            vars: HashMap::new(),
            defs: HashMap::new(),
            parent,
            captured: false,
            anchor: Rc::new(()),
        }
    }
}

pub struct Scopes {
    slots: Vec<Scope>,
    free: Vec<ScopeId>,
}

impl Default for Scopes {
    fn default() -> Self {
        Self::new()
    }
}

impl Scopes {
    pub fn new() -> Self {
        Self {
            slots: vec![Scope::new("global".into(), None)],
            free: Vec::new(),
        }
    }

    pub fn get(&self, id: ScopeId) -> &Scope {
        &self.slots[id.index()]
    }

    pub fn get_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.slots[id.index()]
    }

    /// A new empty scope for a call into `function`.
    pub fn push(&mut self, function: Rc<str>, parent: ScopeId) -> ScopeId {
        if let Some(id) = self.free.pop() {
            let slot = &mut self.slots[id.index()];
            slot.function = function;
            slot.parent = Some(parent);
            return id;
        }
        let id = ScopeId(self.slots.len() as u32);
        self.slots.push(Scope::new(function, Some(parent)));
        id
    }

    /// Build a closure over `id`. The scope is no longer recycled on return.
    pub fn capture(
        &mut self,
        id: ScopeId,
        name: Rc<str>,
        params: Rc<[String]>,
        body: Rc<[Command]>,
    ) -> Rc<Closure> {
        let slot = &mut self.slots[id.index()];
        slot.captured = true;
        Rc::new(Closure {
            name,
            params,
            body,
            scope: id,
            anchor: slot.anchor.clone(),
        })
    }

    /// Recycle `id` unless a closure captured it. Returns whether it was recycled.
    pub fn release(&mut self, id: ScopeId) -> bool {
        if id == ScopeId::GLOBAL {
            return false;
        }
        let slot = &mut self.slots[id.index()];
        if slot.captured {
            return false;
        }
        slot.vars.clear();
        slot.defs.clear();
        slot.parent = None;
        self.free.push(id);
        true
    }

    /// Free every scope that cannot be reached from `roots` or from a value
    /// held outside the arena. Returns the number of scopes freed.
    ///
    /// Values on the host stack (arguments, temporaries, results) are not
    /// visible here. They are found by counting: a closure or container
    /// whose `Rc` count exceeds the references the arena holds is treated
    /// as a root, as is a scope whose anchor has more closures than the
    /// arena contains.
    pub fn collect(&mut self, roots: &[ScopeId]) -> usize {
        let free: HashSet<ScopeId> = self.free.iter().copied().collect();
        let live: Vec<ScopeId> = (0..self.slots.len() as u32)
            .map(ScopeId)
            .filter(|id| !free.contains(id))
            .collect();

        let census = Census::take(&self.slots, &live);
        let mut over: HashMap<ScopeId, usize> = HashMap::new();
        for (closure, _) in census.closures.values() {
            *over.entry(closure.scope).or_default() += 1;
        }
        let mut marks = Marks::default();
        marks.scopes.extend(roots.iter().copied());
        marks.scopes.insert(ScopeId::GLOBAL);
        let mut work: Vec<Node> = roots.iter().copied().map(Node::Scope).collect();
        work.push(Node::Scope(ScopeId::GLOBAL));
        for node in census.external() {
            work.push(node);
        }
        for &id in &live {
            let held = Rc::strong_count(&self.slots[id.index()].anchor) - 1;
            let seen = over.get(&id).copied().unwrap_or(0);
            if held > seen && marks.scopes.insert(id) {
                work.push(Node::Scope(id));
            }
        }
        while let Some(node) = work.pop() {
            match node {
                Node::Scope(id) => {
                    let Some(scope) = self.slots.get(id.index()) else {
                        continue;
                    };
                    if let Some(parent) = scope.parent {
                        if marks.scopes.insert(parent) {
                            work.push(Node::Scope(parent));
                        }
                    }
                    for value in scope.vars.values() {
                        marks.value(value, &mut work);
                    }
                    for closure in scope.defs.values() {
                        marks.closure(closure, &mut work);
                    }
                }
                Node::Value(value) => marks.children(&value, &mut work),
            }
        }

        let mut freed = 0;
        for id in live {
            if id == ScopeId::GLOBAL || marks.scopes.contains(&id) {
                continue;
            }
            let slot = &mut self.slots[id.index()];
            // Dropping the bindings may release closures over other dead
            // scopes; those slots are being freed in this same pass.
            let vars = std::mem::take(&mut slot.vars);
            let defs = std::mem::take(&mut slot.defs);
            slot.parent = None;
            slot.captured = false;
            slot.anchor = Rc::new(());
            drop((vars, defs));
            self.free.push(id);
            freed += 1;
        }
        freed
    }

    /// Number of scopes currently in use.
    pub fn live(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// `from` and its ancestors, innermost first.
    pub fn chain(&self, from: ScopeId) -> impl Iterator<Item = (ScopeId, &Scope)> {
        let mut next = Some(from);
        std::iter::from_fn(move || {
            let id = next?;
            let scope = self.get(id);
            next = scope.parent;
            Some((id, scope))
        })
    }

    /// Resolve `name` as a variable or a function definition.
    pub fn lookup(&self, from: ScopeId, name: &str) -> Option<Value> {
        self.chain(from).find_map(|(_, scope)| {
            scope
                .vars
                .get(name)
                .cloned()
                .or_else(|| scope.defs.get(name).map(|c| Value::Closure(c.clone())))
        })
    }

    /// The nearest scope holding a variable (not a definition) called `name`.
    pub fn find_binding(&self, from: ScopeId, name: &str) -> Option<ScopeId> {
        self.chain(from)
            .find(|(_, scope)| scope.vars.contains_key(name))
            .map(|(id, _)| id)
    }

    /// Resolve a callee: a definition, or a variable holding a function.
    /// A non-function variable does not stop the search.
    pub fn find_closure(&self, from: ScopeId, name: &str) -> Option<Rc<Closure>> {
        self.chain(from).find_map(|(_, scope)| {
            if let Some(def) = scope.defs.get(name) {
                return Some(def.clone());
            }
            match scope.vars.get(name) {
                Some(Value::Closure(c)) => Some(c.clone()),
                _ => None,
            }
        })
    }
}

/// Work item for the marking pass.
enum Node {
    Scope(ScopeId),
    Value(Value),
}

fn container_ptr(value: &Value) -> Option<*const ()> {
    match value {
        Value::Array(items) => Some(Rc::as_ptr(items) as *const ()),
        Value::Map(entries) => Some(Rc::as_ptr(entries) as *const ()),
        _ => None,
    }
}

/// Reference counts of the closures and containers stored in the arena.
#[derive(Default)]
struct Census {
    /// Closures by identity: a clone and how many arena slots refer to it.
    closures: HashMap<*const Closure, (Rc<Closure>, usize)>,
    /// Containers by identity, likewise.
    containers: HashMap<*const (), (Value, usize)>,
}

impl Census {
    fn take(slots: &[Scope], live: &[ScopeId]) -> Self {
        let mut census = Census::default();
        let mut pending: Vec<Value> = Vec::new();
        for id in live {
            let scope = &slots[id.index()];
            for value in scope.vars.values() {
                census.count(value, &mut pending);
            }
            for closure in scope.defs.values() {
                census.count_closure(closure);
            }
        }
        while let Some(container) = pending.pop() {
            match &container {
                Value::Array(items) => {
                    for value in items.borrow().iter() {
                        census.count(value, &mut pending);
                    }
                }
                Value::Map(entries) => {
                    for value in entries.borrow().values() {
                        census.count(value, &mut pending);
                    }
                }
                _ => {}
            }
        }
        census
    }

    fn count(&mut self, value: &Value, pending: &mut Vec<Value>) {
        if let Value::Closure(closure) = value {
            self.count_closure(closure);
            return;
        }
        let Some(ptr) = container_ptr(value) else {
            return;
        };
        let entry = self.containers.entry(ptr).or_insert_with(|| {
            pending.push(value.clone());
            (value.clone(), 0)
        });
        entry.1 += 1;
    }

    fn count_closure(&mut self, closure: &Rc<Closure>) {
        let entry = self
            .closures
            .entry(Rc::as_ptr(closure))
            .or_insert_with(|| (closure.clone(), 0));
        entry.1 += 1;
    }

    /// Closures and containers also referenced from outside the arena. The
    /// census itself holds one clone of each.
    fn external(&self) -> Vec<Node> {
        let mut out = Vec::new();
        for (closure, internal) in self.closures.values() {
            if Rc::strong_count(closure) - 1 > *internal {
                out.push(Node::Value(Value::Closure(closure.clone())));
            }
        }
        for (value, internal) in self.containers.values() {
            let count = match value {
                Value::Array(items) => Rc::strong_count(items),
                Value::Map(entries) => Rc::strong_count(entries),
                _ => continue,
            };
            if count - 1 > *internal {
                out.push(Node::Value(value.clone()));
            }
        }
        out
    }
}

/// What the marking pass has reached.
#[derive(Default)]
struct Marks {
    scopes: HashSet<ScopeId>,
    containers: HashSet<*const ()>,
}

impl Marks {
    fn value(&mut self, value: &Value, work: &mut Vec<Node>) {
        match value {
            Value::Closure(closure) => self.closure(closure, work),
            _ => {
                if let Some(ptr) = container_ptr(value) {
                    if self.containers.insert(ptr) {
                        work.push(Node::Value(value.clone()));
                    }
                }
            }
        }
    }

    fn closure(&mut self, closure: &Closure, work: &mut Vec<Node>) {
        if self.scopes.insert(closure.scope) {
            work.push(Node::Scope(closure.scope));
        }
    }

    fn children(&mut self, value: &Value, work: &mut Vec<Node>) {
        match value {
            Value::Closure(closure) => self.closure(closure, work),
            Value::Array(items) => {
                for item in items.borrow().iter() {
                    self.value(item, work);
                }
            }
            Value::Map(entries) => {
                for item in entries.borrow().values() {
                    self.value(item, work);
                }
            }
            _ => {}
        }
    }
}
