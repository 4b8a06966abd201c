use serenity::model::id::UserId;

use crate::config::Config;

/// Privilegios del autor de un mensaje, resueltos al recibirlo.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Privileges {
    /// Rol DJ, administrador del servidor, admin del bot o dueño con override
    pub elevated: bool,
}

impl Privileges {
    /// Computes privileges from the facts the gateway knows about a member.
    pub fn resolve(
        config: &Config,
        user: UserId,
        role_names: &[String],
        is_administrator: bool,
    ) -> Self {
        let has_dj_role = role_names.iter().any(|r| r == &config.dj_role);
        let is_bot_admin = config.bot_admins.contains(&user.get());
        let owner_override = config.owner_over_member && config.owner_id == Some(user.get());

        Self {
            elevated: has_dj_role || is_administrator || is_bot_admin || owner_override,
        }
    }
}

/// Reglas de "quién puede hacer qué" a partir de la configuración.
#[derive(Debug, Clone)]
pub struct PermissionPolicy {
    pub anyone_can_skip: bool,
    pub anyone_can_pause: bool,
    pub anyone_can_leave: bool,
    pub anyone_can_adjust: bool,
}

impl PermissionPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            anyone_can_skip: config.anyone_can_skip,
            anyone_can_pause: config.anyone_can_pause,
            anyone_can_leave: config.anyone_can_leave,
            anyone_can_adjust: config.anyone_can_adjust,
        }
    }

    /// Quien pidió la canción actual siempre puede saltarla.
    pub fn can_skip(
        &self,
        privileges: Privileges,
        user: UserId,
        requester: Option<UserId>,
    ) -> bool {
        self.anyone_can_skip || privileges.elevated || requester == Some(user)
    }

    pub fn can_adjust(
        &self,
        privileges: Privileges,
        user: UserId,
        requester: Option<UserId>,
    ) -> bool {
        self.anyone_can_adjust || privileges.elevated || requester == Some(user)
    }

    pub fn can_pause(&self, privileges: Privileges) -> bool {
        self.anyone_can_pause || privileges.elevated
    }

    pub fn can_leave(&self, privileges: Privileges) -> bool {
        self.anyone_can_leave || privileges.elevated
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const USER: UserId = UserId::new(5);

    #[test]
    fn dj_role_and_admin_are_elevated() {
        let config = Config::default();
        assert!(Privileges::resolve(&config, USER, &["DJ".into()], false).elevated);
        assert!(Privileges::resolve(&config, USER, &[], true).elevated);
        assert!(!Privileges::resolve(&config, USER, &["Miembro".into()], false).elevated);
    }

    #[test]
    fn owner_needs_override_flag() {
        let mut config = Config {
            owner_id: Some(5),
            ..Config::default()
        };
        assert!(!Privileges::resolve(&config, USER, &[], false).elevated);
        config.owner_over_member = true;
        assert!(Privileges::resolve(&config, USER, &[], false).elevated);
    }

    #[test]
    fn bot_admins_are_elevated() {
        let config = Config {
            bot_admins: vec![5],
            ..Config::default()
        };
        assert!(Privileges::resolve(&config, USER, &[], false).elevated);
    }

    #[test]
    fn requester_may_skip_their_track() {
        let policy = PermissionPolicy::from_config(&Config::default());
        let member = Privileges::default();
        assert!(policy.can_skip(member, USER, Some(USER)));
        assert!(!policy.can_skip(member, USER, Some(UserId::new(6))));
        assert!(!policy.can_pause(member));

        let open = PermissionPolicy::from_config(&Config {
            anyone_can_pause: true,
            ..Config::default()
        });
        assert!(open.can_pause(member));
    }
}
