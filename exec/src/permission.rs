use std::collections::{HashMap, HashSet};

use log::debug;

/// Capabilities the runtime checks before touching native code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PermissionScope {
    /// Generating machine code for a pattern.
    CodeGeneration,
    /// Running generated code.
    NativeExecution,
}

impl PermissionScope {
    pub const ALL: [PermissionScope; 2] =
        [PermissionScope::CodeGeneration, PermissionScope::NativeExecution];
}

/// Grant/deny bookkeeping for one or more scopes.
pub trait PermissionBase {
    /// Apply a deny list: `"*"` denies the whole scope, otherwise a
    /// comma-separated list of parameters is denied.
    fn apply(&mut self, deny: &str, scope: PermissionScope);

    /// Deny `params` (or the whole scope when empty). Returns whether the
    /// denial was recorded.
    fn deny(&mut self, scope: PermissionScope, params: &[String]) -> bool;

    fn is_granted(&self, scope: PermissionScope, param: &str) -> bool;
}

/// Permission state of a single scope.
#[derive(Debug, Default)]
pub struct ScopePermission {
    deny_all: bool,
    denied: HashSet<String>,
}

impl PermissionBase for ScopePermission {
    fn apply(&mut self, deny: &str, _scope: PermissionScope) {
        if deny == "*" {
            self.deny_all = true;
            return;
        }
        self.denied.extend(
            deny.split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from),
        );
    }

    fn deny(&mut self, _scope: PermissionScope, params: &[String]) -> bool {
        if params.is_empty() {
            self.deny_all = true;
        } else {
            self.denied.extend(params.iter().cloned());
        }
        true
    }

    fn is_granted(&self, _scope: PermissionScope, param: &str) -> bool {
        !self.deny_all && !self.denied.contains(param)
    }
}

/// Per-scope permission registry. Everything is granted until denied.
pub struct Permissions {
    scopes: HashMap<PermissionScope, Box<dyn PermissionBase>>,
}

impl Default for Permissions {
    fn default() -> Self {
        let scopes = PermissionScope::ALL
            .into_iter()
            .map(|s| (s, Box::new(ScopePermission::default()) as Box<dyn PermissionBase>))
            .collect();
        Self { scopes }
    }
}

impl Permissions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the handler for `scope`.
    pub fn set_handler(&mut self, scope: PermissionScope, handler: Box<dyn PermissionBase>) {
        self.scopes.insert(scope, handler);
    }
}

impl PermissionBase for Permissions {
    fn apply(&mut self, deny: &str, scope: PermissionScope) {
        if let Some(h) = self.scopes.get_mut(&scope) {
            h.apply(deny, scope);
        }
    }

    fn deny(&mut self, scope: PermissionScope, params: &[String]) -> bool {
        debug!("denying {:?} for {:?}", scope, params);
        self.scopes
            .get_mut(&scope)
            .is_some_and(|h| h.deny(scope, params))
    }

    fn is_granted(&self, scope: PermissionScope, param: &str) -> bool {
        self.scopes
            .get(&scope)
            .map_or(true, |h| h.is_granted(scope, param))
    }
}
