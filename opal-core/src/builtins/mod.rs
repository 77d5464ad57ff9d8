//! The built-in decorator set (spec.md §4.8): `@shell`, `@var`, `@env`. Every other decorator in
//! the glossary (`@retry`, `@ssh.connect`, `@parallel`, `@timeout`) ships outside this core per
//! SPEC_FULL.md's module boundary, but is registered against the same [`crate::registry::Registry`]
//! API these three demonstrate.

pub mod env;
pub mod shell;
pub mod var;

use crate::descriptor::RoleSet;
use crate::registry::Registry;

/// Registers every built-in decorator's descriptor and role implementations against `registry`.
pub fn register_all(registry: &Registry) {
    registry.register(
        shell::descriptor(),
        RoleSet::new()
            .with_wrapper(shell::wrapper())
            .with_endpoint(shell::endpoint()),
    );
    registry.register(
        var::descriptor(),
        RoleSet::new().with_provider(var::provider()),
    );
    registry.register(
        env::descriptor(),
        RoleSet::new().with_provider(env::provider()),
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Role;

    #[test]
    fn register_all_populates_the_registry() {
        let registry = Registry::new();
        register_all(&registry);

        let shell = registry.lookup("shell").expect("shell registered");
        assert!(shell.roles.roles().contains(&Role::Wrapper));
        assert!(shell.roles.roles().contains(&Role::Endpoint));

        let var = registry.lookup("var").expect("var registered");
        assert!(var.roles.roles().contains(&Role::Provider));

        let env = registry.lookup("env").expect("env registered");
        assert!(env.roles.roles().contains(&Role::Provider));
    }
}
