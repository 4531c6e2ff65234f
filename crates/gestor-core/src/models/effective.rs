//! Effective permission view (derived, never persisted).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::family::Family;
use super::permission::Permission;

/// Where an effective permission comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Origin {
    /// Assigned straight to the user.
    Direct,
    /// Obtained through a family.
    Family { id: Uuid, name: String },
}

impl Origin {
    pub fn family(family: &Family) -> Self {
        Self::Family {
            id: family.id,
            name: family.name.clone(),
        }
    }
}

/// A permission together with how it was obtained.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectivePermission {
    pub permission: Permission,
    pub is_direct: bool,
    pub is_inherited: bool,
    /// `Direct` first when present, then families in discovery order.
    pub origins: Vec<Origin>,
}

impl EffectivePermission {
    pub(crate) fn direct(permission: Permission) -> Self {
        Self {
            permission,
            is_direct: true,
            is_inherited: false,
            origins: vec![Origin::Direct],
        }
    }

    pub(crate) fn inherited(permission: Permission, via: &Family) -> Self {
        Self {
            permission,
            is_direct: false,
            is_inherited: true,
            origins: vec![Origin::family(via)],
        }
    }

    pub(crate) fn mark_direct(&mut self) {
        if !self.is_direct {
            self.is_direct = true;
            self.origins.insert(0, Origin::Direct);
        }
    }

    pub(crate) fn add_family(&mut self, via: &Family) {
        self.is_inherited = true;
        let seen = self
            .origins
            .iter()
            .any(|o| matches!(o, Origin::Family { id, .. } if *id == via.id));
        if !seen {
            self.origins.push(Origin::family(via));
        }
    }

    /// Names of the contributing families, in origin order.
    pub fn family_names(&self) -> Vec<&str> {
        self.origins
            .iter()
            .filter_map(|o| match o {
                Origin::Family { name, .. } => Some(name.as_str()),
                Origin::Direct => None,
            })
            .collect()
    }

    /// Human-readable origin, e.g. `Direct + Heredado (Administradores, Editores)`.
    pub fn origin_description(&self) -> String {
        let inherited = format!("Heredado ({})", self.family_names().join(", "));
        match (self.is_direct, self.is_inherited) {
            (true, true) => format!("Direct + {inherited}"),
            (true, false) => "Direct".to_string(),
            (false, true) => inherited,
            (false, false) => String::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::models::version::ConcurrencyToken;

    fn permission(name: &str) -> Permission {
        Permission {
            id: Uuid::new_v4(),
            name: name.into(),
            form_id: format!("frm{name}"),
            version: ConcurrencyToken::INITIAL,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn family(name: &str) -> Family {
        Family {
            id: Uuid::new_v4(),
            name: name.into(),
            description: None,
            version: ConcurrencyToken::INITIAL,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn describes_direct_only() {
        let ep = EffectivePermission::direct(permission("Clientes"));
        assert_eq!(ep.origin_description(), "Direct");
    }

    #[test]
    fn describes_direct_and_inherited() {
        let admins = family("Administradores");
        let editors = family("Editores");
        let mut ep = EffectivePermission::inherited(permission("Facturas"), &admins);
        ep.add_family(&editors);
        ep.add_family(&admins);
        ep.mark_direct();

        assert!(ep.is_direct && ep.is_inherited);
        assert_eq!(ep.origins.len(), 3);
        assert_eq!(ep.origins[0], Origin::Direct);
        assert_eq!(
            ep.origin_description(),
            "Direct + Heredado (Administradores, Editores)"
        );
    }
}
