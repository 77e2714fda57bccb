use crate::model::{Action, EntityDefinition, UserContext};

/// Permission check invoked before every mutating operation. Injected by
/// the embedding application rather than hard-coded; the default
/// implementation evaluates the definition's permission expressions.
pub trait Authorizer: Send + Sync {
    fn can_perform(
        &self,
        action: Action,
        definition: &EntityDefinition,
        caller: &UserContext,
    ) -> bool;

    /// Entity definitions and fields are managed by privileged callers only
    fn can_manage_schema(&self, caller: &UserContext) -> bool;
}

/// Evaluates the permission expressions stored on an entity definition:
/// `any`, `authenticated`, `role:<name>` or `system`. Unknown expressions
/// deny.
pub struct ExprAuthorizer;

impl Authorizer for ExprAuthorizer {
    fn can_perform(
        &self,
        action: Action,
        definition: &EntityDefinition,
        caller: &UserContext,
    ) -> bool {
        match definition.permissions.expression_for(action) {
            "any" => true,
            "authenticated" => !caller.user_id.is_empty() && caller.user_id != "anonymous",
            "system" => caller.user_id == "system",
            expr => match expr.strip_prefix("role:") {
                Some(role) => caller.has_role(role),
                None => false,
            },
        }
    }

    fn can_manage_schema(&self, caller: &UserContext) -> bool {
        caller.user_id == "system" || caller.has_role("admin")
    }
}

/// Permissive authorizer for tests and embedded single-user setups
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn can_perform(&self, _: Action, _: &EntityDefinition, _: &UserContext) -> bool {
        true
    }

    fn can_manage_schema(&self, _: &UserContext) -> bool {
        true
    }
}

pub static ALLOW_ALL: AllowAll = AllowAll;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NewEntityDefinition, PermissionSet, TypeTier};

    fn definition_with(update_expr: &str) -> EntityDefinition {
        EntityDefinition::from_new(
            NewEntityDefinition {
                id: None,
                name: "Article".to_string(),
                storage_key: "articles".to_string(),
                tier: TypeTier::Primary,
                permissions: Some(PermissionSet {
                    create: "authenticated".to_string(),
                    read: "any".to_string(),
                    update: update_expr.to_string(),
                    delete: "role:admin".to_string(),
                }),
                page_policy: None,
                section_titles: None,
            },
            "test".to_string(),
        )
    }

    #[test]
    fn test_expression_evaluation() {
        let def = definition_with("role:editor");
        let authorizer = ExprAuthorizer;

        let anonymous = UserContext::with_details("anonymous".to_string(), None, vec![]);
        let editor = UserContext::with_details(
            "u1".to_string(),
            None,
            vec!["editor".to_string()],
        );

        assert!(authorizer.can_perform(Action::Read, &def, &anonymous));
        assert!(!authorizer.can_perform(Action::Create, &def, &anonymous));
        assert!(authorizer.can_perform(Action::Create, &def, &editor));
        assert!(authorizer.can_perform(Action::Update, &def, &editor));
        assert!(!authorizer.can_perform(Action::Delete, &def, &editor));
        assert!(authorizer.can_perform(Action::Delete, &def, &UserContext::system()));
    }

    #[test]
    fn test_unknown_expression_denies() {
        let def = definition_with("everyone-and-their-dog");
        let authorizer = ExprAuthorizer;
        assert!(!authorizer.can_perform(Action::Update, &def, &UserContext::system()));
    }
}
