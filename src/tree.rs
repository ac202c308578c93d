//! Segment trie mapping method + path to a registered route.
//!
//! Each node owns three kinds of children: literal segments keyed by text, a
//! single parameter child shared by every `:name` at that depth (the name
//! lives in the route's [`Pattern`], not in the tree), and a catch-all slot.
//! Lookup walks the path once, trying children in precedence order
//! `literal → parameter → catch-all` and backtracking only when a more
//! specific branch dead-ends, so typical cost is O(segments) no matter how
//! many routes are registered.

use std::collections::{HashMap, HashSet};

use http::Method;
use tracing::warn;

use crate::error::RouteError;
use crate::path::{Pattern, Segment};
use crate::router::RouteId;

/// Result of [`RouteTree::lookup`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Lookup {
    Found(RouteId),
    /// The path matches, but not under the requested method. Carries the
    /// methods that would have matched, sorted.
    MethodNotAllowed(Vec<Method>),
    NotFound,
}

#[derive(Default)]
pub(crate) struct RouteTree {
    root: Node,
    registered: HashSet<(Method, String)>,
}

#[derive(Default)]
struct Node {
    literals: HashMap<String, Node>,
    param: Option<Box<Node>>,
    /// Routes ending exactly at this node, in registration order.
    endpoints: Vec<(Method, RouteId)>,
    /// Routes whose catch-all starts at this depth, in registration order.
    catch_all: Vec<(Method, RouteId)>,
}

impl RouteTree {
    pub(crate) fn insert(
        &mut self,
        method: &Method,
        pattern: &Pattern,
        id: RouteId,
    ) -> Result<(), RouteError> {
        let canonical = pattern.canonical();
        if !self.registered.insert((method.clone(), canonical)) {
            return Err(RouteError::Conflict {
                method: method.clone(),
                pattern: pattern.as_str().to_owned(),
            });
        }

        let mut node = &mut self.root;
        for segment in pattern.segments() {
            node = match segment {
                Segment::Literal(text) => node.literals.entry(text.clone()).or_default(),
                Segment::Param(_) => &mut **node.param.get_or_insert_with(Box::default),
                Segment::CatchAll(_) => {
                    shadow_check(&node.catch_all, method, pattern);
                    node.catch_all.push((method.clone(), id));
                    return Ok(());
                }
            };
        }

        shadow_check(&node.endpoints, method, pattern);
        node.endpoints.push((method.clone(), id));
        Ok(())
    }

    /// Resolves `segments` (see [`crate::path::split`]) under `method`.
    pub(crate) fn lookup(&self, method: &Method, segments: &[&str]) -> Lookup {
        let mut allowed = Vec::new();
        if let Some(id) = self.root.find(method, segments, &mut allowed) {
            return Lookup::Found(id);
        }
        if allowed.is_empty() {
            return Lookup::NotFound;
        }
        allowed.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        allowed.dedup();
        Lookup::MethodNotAllowed(allowed)
    }
}

impl Node {
    fn find(&self, method: &Method, segments: &[&str], allowed: &mut Vec<Method>) -> Option<RouteId> {
        match segments.split_first() {
            None => {
                if let Some(id) = pick(&self.endpoints, method, allowed) {
                    return Some(id);
                }
            }
            Some((head, rest)) => {
                if let Some(child) = self.literals.get(*head) {
                    if let Some(id) = child.find(method, rest, allowed) {
                        return Some(id);
                    }
                }
                if let Some(child) = &self.param {
                    if let Some(id) = child.find(method, rest, allowed) {
                        return Some(id);
                    }
                }
            }
        }
        pick(&self.catch_all, method, allowed)
    }
}

/// First route registered for `method`, or records the methods on offer.
fn pick(slot: &[(Method, RouteId)], method: &Method, allowed: &mut Vec<Method>) -> Option<RouteId> {
    match slot.iter().find(|(m, _)| m == method) {
        Some((_, id)) => Some(*id),
        None => {
            allowed.extend(slot.iter().map(|(m, _)| m.clone()));
            None
        }
    }
}

fn shadow_check(slot: &[(Method, RouteId)], method: &Method, pattern: &Pattern) {
    if slot.iter().any(|(m, _)| m == method) {
        warn!(
            %method,
            pattern = pattern.as_str(),
            "route is shadowed by an equally specific route registered earlier"
        );
    }
}
