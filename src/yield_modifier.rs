use std::time::Duration;

use spacetimedb::{table, Identity, ReducerContext, Table, Timestamp};
use log;

use crate::models::ModifierKind;
use crate::permissions::require_admin;

/// A timed or permanent bonus on one player. For `ScrapYield` the value is the
/// extra fraction gathered: 0.5 means a 1.5x multiplier.
#[table(name = player_modifier, public)]
#[derive(Clone, Debug)]
pub struct PlayerModifier {
    #[primary_key]
    #[auto_inc]
    pub modifier_id: u64,
    pub player_id: Identity,
    pub kind: ModifierKind,
    pub value: f32,
    pub started_at: Timestamp,
    pub ends_at: Option<Timestamp>,
}

/// Fractional bonus units a player has earned but not yet received.
#[table(name = yield_remainder)]
#[derive(Clone, Debug)]
pub struct YieldRemainder {
    #[primary_key]
    #[auto_inc]
    pub id: u64,
    pub player_id: Identity,
    pub kind: ModifierKind,
    pub carried: f32,
}

/// Per-player yield state the transfer step reads and writes.
pub trait YieldLedger {
    /// Current modifier value, `None` when the player has none active.
    fn modifier_value(&self, actor: &Identity, kind: ModifierKind) -> Option<f32>;
    fn carried_remainder(&self, actor: &Identity, kind: ModifierKind) -> f32;
    fn set_carried_remainder(&mut self, actor: &Identity, kind: ModifierKind, carried: f32);
}

/// Largest modifier value an admin can set: an 11x scrap yield.
pub const MAX_MODIFIER_VALUE: f32 = 10.0;

/// Rows written before the cap existed are clamped on read.
pub fn yield_multiplier(modifier_value: f32) -> f32 {
    1.0 + modifier_value.clamp(0.0, MAX_MODIFIER_VALUE)
}

/// Outcome of applying a multiplier to one stack.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BonusYield {
    pub bonus_units: u32,
    pub carried: f32,
}

/// Adds `quantity * (multiplier - 1)` to the carried remainder and pays out its whole part.
/// A carried value that is not a finite fraction in `[0, 1)` is treated as zero.
pub fn accumulate_bonus(quantity: u32, multiplier: f32, carried: f32) -> BonusYield {
    let carried = sanitize_carried(carried);
    if !(multiplier.is_finite() && multiplier > 1.0) {
        return BonusYield { bonus_units: 0, carried };
    }
    let total = carried + quantity as f32 * (multiplier - 1.0);
    if !total.is_finite() {
        return BonusYield { bonus_units: 0, carried };
    }
    let whole = total.floor();
    // `as` saturates at u32::MAX.
    BonusYield { bonus_units: whole as u32, carried: sanitize_carried(total - whole) }
}

fn sanitize_carried(carried: f32) -> f32 {
    if carried.is_finite() && (0.0..1.0).contains(&carried) {
        carried
    } else {
        0.0
    }
}

pub fn active_modifier_value(ctx: &ReducerContext, player_id: &Identity, kind: ModifierKind) -> Option<f32> {
    ctx.db.player_modifier().iter()
        .filter(|m| m.player_id == *player_id && m.kind == kind)
        .filter(|m| m.ends_at.map_or(true, |ends_at| ends_at > ctx.timestamp))
        .map(|m| m.value)
        .last()
}

pub fn carried_remainder(ctx: &ReducerContext, player_id: &Identity, kind: ModifierKind) -> f32 {
    ctx.db.yield_remainder().iter()
        .find(|r| r.player_id == *player_id && r.kind == kind)
        .map_or(0.0, |r| r.carried)
}

pub fn store_carried_remainder(ctx: &ReducerContext, player_id: &Identity, kind: ModifierKind, carried: f32) {
    let carried = sanitize_carried(carried);
    let remainders = ctx.db.yield_remainder();
    match remainders.iter().find(|r| r.player_id == *player_id && r.kind == kind) {
        Some(mut row) => {
            row.carried = carried;
            remainders.id().update(row);
        }
        None => {
            if let Err(e) = remainders.try_insert(YieldRemainder { id: 0, player_id: *player_id, kind, carried }) {
                log::error!("[Yield] Failed to store remainder for {:?}: {}", player_id, e);
            }
        }
    }
}

/// Sets the scrap yield modifier for a player. `duration_secs` of 0 keeps it until cleared.
#[spacetimedb::reducer]
pub fn set_player_modifier(ctx: &ReducerContext, target: Identity, value: f32, duration_secs: u64) -> Result<(), String> {
    require_admin(ctx)?;
    if !value.is_finite() || !(0.0..=MAX_MODIFIER_VALUE).contains(&value) {
        return Err(format!("Modifier value must be between 0 and {}.", MAX_MODIFIER_VALUE));
    }
    clear_modifiers(ctx, &target, ModifierKind::ScrapYield);

    let ends_at = (duration_secs > 0)
        .then(|| ctx.timestamp + Duration::from_secs(duration_secs));
    ctx.db.player_modifier().try_insert(PlayerModifier {
        modifier_id: 0,
        player_id: target,
        kind: ModifierKind::ScrapYield,
        value,
        started_at: ctx.timestamp,
        ends_at,
    }).map_err(|e| format!("Failed to set modifier: {}", e))?;
    log::info!("[Yield] Scrap yield modifier {} for {:?} (duration {}s)", value, target, duration_secs);
    Ok(())
}

#[spacetimedb::reducer]
pub fn clear_player_modifier(ctx: &ReducerContext, target: Identity) -> Result<(), String> {
    require_admin(ctx)?;
    let removed = clear_modifiers(ctx, &target, ModifierKind::ScrapYield);
    log::info!("[Yield] Cleared {} scrap yield modifiers from {:?}", removed, target);
    Ok(())
}

fn clear_modifiers(ctx: &ReducerContext, player_id: &Identity, kind: ModifierKind) -> usize {
    let modifiers = ctx.db.player_modifier();
    let ids: Vec<u64> = modifiers.iter()
        .filter(|m| m.player_id == *player_id && m.kind == kind)
        .map(|m| m.modifier_id)
        .collect();
    for id in &ids {
        modifiers.modifier_id().delete(id);
    }
    ids.len()
}
