/******************************************************************************
 *                                                                            *
 * Permission registry for auto pickup. Each container category owns three  *
 * permissions (`<Category>.On`, `<Category>.NoGibs`, `<Category>.InstaKill`)*
 * registered once at init. Grants are rows keyed by player identity and are *
 * managed by admins through reducers.                                        *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Table};
use log;

use crate::models::ContainerCategory;

/// The per-category switches a player can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionFlag {
    /// Auto pickup is enabled for the category.
    On,
    /// Containers are removed without debris.
    NoGibs,
    /// Pickup fires on any hit, lethal or not.
    InstaKill,
}

impl PermissionFlag {
    pub const ALL: [PermissionFlag; 3] = [PermissionFlag::On, PermissionFlag::NoGibs, PermissionFlag::InstaKill];

    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionFlag::On => "On",
            PermissionFlag::NoGibs => "NoGibs",
            PermissionFlag::InstaKill => "InstaKill",
        }
    }
}

pub fn permission_name(category: ContainerCategory, flag: PermissionFlag) -> String {
    format!("{}.{}", category.as_str(), flag.as_str())
}

/// Every permission the module knows about.
pub fn all_permission_names() -> Vec<String> {
    ContainerCategory::ALL
        .iter()
        .flat_map(|category| PermissionFlag::ALL.iter().map(move |flag| permission_name(*category, *flag)))
        .collect()
}

/// Permission lookups the pickup engine relies on.
pub trait PermissionService {
    fn has_permission(&self, actor: &Identity, permission: &str) -> bool;

    fn has_flag(&self, actor: &Identity, category: ContainerCategory, flag: PermissionFlag) -> bool {
        self.has_permission(actor, &permission_name(category, flag))
    }
}

// --- Tables ---

#[spacetimedb::table(name = registered_permission, public)]
#[derive(Clone, Debug)]
pub struct RegisteredPermission {
    #[primary_key]
    pub name: String,
}

#[spacetimedb::table(name = player_permission, public)]
#[derive(Clone, Debug)]
pub struct PlayerPermission {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub player_id: Identity,
    pub permission: String,
}

#[spacetimedb::table(name = permission_admin)]
#[derive(Clone, Debug)]
pub struct PermissionAdmin {
    #[primary_key]
    pub identity: Identity,
}

/// Registers the six category permissions and records the module owner as admin.
pub fn init_permissions(ctx: &ReducerContext) -> Result<(), String> {
    let registered = ctx.db.registered_permission();
    for name in all_permission_names() {
        if registered.name().find(&name).is_none() {
            registered.try_insert(RegisteredPermission { name: name.clone() })
                .map_err(|e| format!("Failed to register permission {}: {}", name, e))?;
            log::info!("[Permissions] Registered permission {}", name);
        }
    }

    let admins = ctx.db.permission_admin();
    if admins.identity().find(&ctx.sender).is_none() {
        admins.try_insert(PermissionAdmin { identity: ctx.sender })
            .map_err(|e| format!("Failed to record module owner as admin: {}", e))?;
        log::info!("[Permissions] {:?} is permission admin.", ctx.sender);
    }
    Ok(())
}

pub fn player_has_permission(ctx: &ReducerContext, player_id: &Identity, permission: &str) -> bool {
    ctx.db.player_permission().iter().any(|grant| grant.player_id == *player_id && grant.permission == permission)
}

pub(crate) fn require_admin(ctx: &ReducerContext) -> Result<(), String> {
    if ctx.db.permission_admin().identity().find(&ctx.sender).is_some() {
        Ok(())
    } else {
        log::warn!("[Permissions] Rejected admin request from {:?}", ctx.sender);
        Err("Only permission admins can do that.".to_string())
    }
}

fn require_registered(ctx: &ReducerContext, permission: &str) -> Result<(), String> {
    ctx.db.registered_permission().name().find(&permission.to_string())
        .map(|_| ())
        .ok_or_else(|| format!("Unknown permission '{}'.", permission))
}

// --- Reducers ---

#[spacetimedb::reducer]
pub fn grant_permission(ctx: &ReducerContext, target: Identity, permission: String) -> Result<(), String> {
    require_admin(ctx)?;
    require_registered(ctx, &permission)?;

    if player_has_permission(ctx, &target, &permission) {
        log::debug!("[Permissions] {:?} already holds {}", target, permission);
        return Ok(());
    }
    ctx.db.player_permission().try_insert(PlayerPermission { id: 0, player_id: target, permission: permission.clone() })
        .map_err(|e| format!("Failed to grant {}: {}", permission, e))?;
    log::info!("[Permissions] Granted {} to {:?}", permission, target);
    Ok(())
}

#[spacetimedb::reducer]
pub fn revoke_permission(ctx: &ReducerContext, target: Identity, permission: String) -> Result<(), String> {
    require_admin(ctx)?;
    require_registered(ctx, &permission)?;

    let grants = ctx.db.player_permission();
    let matching: Vec<u64> = grants.iter()
        .filter(|grant| grant.player_id == target && grant.permission == permission)
        .map(|grant| grant.id)
        .collect();
    for id in &matching {
        grants.id().delete(id);
    }
    log::info!("[Permissions] Revoked {} from {:?} ({} grant rows)", permission, target, matching.len());
    Ok(())
}

#[spacetimedb::reducer]
pub fn add_permission_admin(ctx: &ReducerContext, target: Identity) -> Result<(), String> {
    require_admin(ctx)?;
    let admins = ctx.db.permission_admin();
    if admins.identity().find(&target).is_none() {
        admins.try_insert(PermissionAdmin { identity: target })
            .map_err(|e| format!("Failed to add admin: {}", e))?;
        log::info!("[Permissions] {:?} added {:?} as admin", ctx.sender, target);
    }
    Ok(())
}
