/******************************************************************************
 *                                                                            *
 * Auto pickup for barrels and road signs. Runs on every damage event against*
 * a loot container, decides whether the attacker gets the contents straight *
 * into their inventory, moves the items and queues the emptied container    *
 * for destruction on the next tick. The host is injected through traits so  *
 * the rules run the same against the database and against test fakes.      *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::Identity;
use log;

use crate::config::AutoPickupConfig;
use crate::container_despawn::{ContainerLifecycle, DespawnJob, TickScheduler};
use crate::items::{ItemStack, SCRAP_ITEM_NAME};
use crate::loot_container::{classify, LootContainer};
use crate::models::{ContainerCategory, ModifierKind};
use crate::permissions::{PermissionFlag, PermissionService};
use crate::utils::is_within_planar_distance;
use crate::yield_modifier::{accumulate_bonus, yield_multiplier, YieldLedger};

// --- Types ---

/// A single damage application against a container.
#[derive(Debug, Clone, PartialEq)]
pub struct DamageEvent {
    pub container_id: u64,
    pub initiator: Option<Identity>,
    pub total_damage: f32,
}

/// What the damage pipeline should do after the hook ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookResult {
    /// No opinion, default damage handling proceeds.
    Continue,
    /// Loot was already handled, skip default damage handling.
    Suppress,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActorSnapshot {
    pub identity: Identity,
    pub pos_x: f32,
    pub pos_y: f32,
    pub pos_z: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PickupGrant {
    pub actor: ActorSnapshot,
    pub category: ContainerCategory,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Decision {
    Skip,
    Transfer(PickupGrant),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransferReport {
    pub moved: Vec<ItemStack>,
    pub bonus_units: u32,
    pub failed: usize,
    pub emptied: bool,
}

// --- Collaborators ---

/// Looks up players that can receive loot.
pub trait ActorDirectory {
    fn find_actor(&self, identity: &Identity) -> Option<ActorSnapshot>;
}

/// Access to container contents and the move into a player's inventory.
pub trait LootInventory {
    /// Stacks in the container, `None` when its inventory can't be resolved.
    fn container_stacks(&self, container_id: u64) -> Option<Vec<ItemStack>>;

    /// Moves one stack out of the container into the actor's inventory. `quantity`
    /// replaces the stack's own quantity.
    fn give_stack(&mut self, container_id: u64, stack: &ItemStack, quantity: u32, actor: &Identity) -> Result<(), String>;
}

// --- Evaluation ---

/// The last attacker wins when it is still a known player, otherwise whoever
/// initiated this hit.
pub fn resolve_actor<H: ActorDirectory>(host: &H, container: &LootContainer, hit: &DamageEvent) -> Option<ActorSnapshot> {
    container.last_attacker
        .and_then(|identity| host.find_actor(&identity))
        .or_else(|| hit.initiator.and_then(|identity| host.find_actor(&identity)))
}

pub fn evaluate<H>(
    host: &H,
    config: &AutoPickupConfig,
    container: &LootContainer,
    hit: &DamageEvent,
    category: ContainerCategory,
) -> Decision
where
    H: ActorDirectory + PermissionService + LootInventory,
{
    if hit.container_id != container.id {
        return Decision::Skip;
    }

    let Some(actor) = resolve_actor(host, container, hit) else {
        log::trace!("[AutoPickup] Container {}: no player to receive loot.", container.id);
        return Decision::Skip;
    };

    if !host.has_flag(&actor.identity, category, PermissionFlag::On) {
        log::trace!("[AutoPickup] Container {}: {:?} lacks {}.On", container.id, actor.identity, category.as_str());
        return Decision::Skip;
    }

    if host.container_stacks(container.id).is_none() {
        return Decision::Skip;
    }

    if config.auto_pickup_distance > 0.0
        && !is_within_planar_distance(actor.pos_x, actor.pos_y, container.pos_x, container.pos_y, config.auto_pickup_distance)
    {
        log::trace!("[AutoPickup] Container {}: {:?} out of range.", container.id, actor.identity);
        return Decision::Skip;
    }

    let remaining_health = container.health - hit.total_damage;
    if remaining_health > 0.0 && !host.has_flag(&actor.identity, category, PermissionFlag::InstaKill) {
        log::trace!("[AutoPickup] Container {}: hit not lethal ({:.1} health left).", container.id, remaining_health);
        return Decision::Skip;
    }

    Decision::Transfer(PickupGrant { actor, category })
}

// --- Transfer ---

/// Drains the container into the actor's inventory. Stacks that fail to move are
/// logged and left behind, the event itself never fails.
pub fn transfer_loot<H>(host: &mut H, container_id: u64, actor: &Identity) -> TransferReport
where
    H: LootInventory + YieldLedger,
{
    let mut report = TransferReport::default();
    let stacks = host.container_stacks(container_id).unwrap_or_default();

    for stack in stacks {
        let mut quantity = stack.quantity;
        if stack.item_name == SCRAP_ITEM_NAME {
            if let Some(value) = host.modifier_value(actor, ModifierKind::ScrapYield) {
                let carried = host.carried_remainder(actor, ModifierKind::ScrapYield);
                let bonus = accumulate_bonus(stack.quantity, yield_multiplier(value), carried);
                host.set_carried_remainder(actor, ModifierKind::ScrapYield, bonus.carried);
                quantity = quantity.saturating_add(bonus.bonus_units);
                report.bonus_units = report.bonus_units.saturating_add(bonus.bonus_units);
            }
        }

        match host.give_stack(container_id, &stack, quantity, actor) {
            Ok(()) => report.moved.push(ItemStack { quantity, ..stack }),
            Err(e) => {
                log::warn!("[AutoPickup] Failed to move {} x{} from container {} to {:?}: {}",
                    stack.item_name, quantity, container_id, actor, e);
                report.failed += 1;
            }
        }
    }

    report.emptied = host.container_stacks(container_id).map_or(true, |left| left.is_empty());
    report
}

// --- Hook ---

/// Entry point for a damage event against any container. Returns `Suppress` when the
/// loot was moved so the default damage handling must not run.
pub fn on_entity_take_damage<H>(
    host: &mut H,
    config: &AutoPickupConfig,
    container: Option<&LootContainer>,
    hit: Option<&DamageEvent>,
) -> HookResult
where
    H: ActorDirectory + PermissionService + LootInventory + YieldLedger + TickScheduler + ContainerLifecycle,
{
    let (Some(container), Some(hit)) = (container, hit) else {
        return HookResult::Continue;
    };
    if container.is_destroyed {
        return HookResult::Continue;
    }
    let Some(category) = classify(&container.prefab_name) else {
        return HookResult::Continue;
    };
    if container.despawn_pending {
        // Already emptied, destruction is queued for the next tick.
        return HookResult::Suppress;
    }

    let grant = match evaluate(host, config, container, hit, category) {
        Decision::Skip => return HookResult::Continue,
        Decision::Transfer(grant) => grant,
    };

    let report = transfer_loot(host, container.id, &grant.actor.identity);
    log::info!("[AutoPickup] {:?} picked up {} stacks (+{} bonus scrap) from {} {}.",
        grant.actor.identity, report.moved.len(), report.bonus_units, container.prefab_name, container.id);

    if report.emptied {
        let job = DespawnJob {
            container_id: container.id,
            actor: grant.actor.identity,
            category: grant.category,
            initiator: hit.initiator,
            total_damage: hit.total_damage,
        };
        // Only flag the container once the job exists, otherwise it would stay pending forever.
        match host.schedule_next_tick(job) {
            Ok(()) => host.mark_despawn_pending(container.id),
            Err(e) => log::error!("[AutoPickup] Failed to schedule despawn of container {}: {}", container.id, e),
        }
    }

    HookResult::Suppress
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::yield_modifier::MAX_MODIFIER_VALUE;

    const PLAYER: u8 = 1;

    fn barrel_setup(health: f32) -> (FakeHost, LootContainer, Identity) {
        let player = identity(PLAYER);
        let mut host = FakeHost::default();
        host.add_actor(player, 1.0, 0.0);
        host.grant(player, "Barrel.On");
        host.containers.insert(7, vec![stack(100, "wood", 100)]);
        (host, container(7, "loot_barrel_1", health), player)
    }

    fn hit(player: Identity, damage: f32) -> DamageEvent {
        DamageEvent { container_id: 7, initiator: Some(player), total_damage: damage }
    }

    #[test]
    fn lethal_hit_moves_loot_and_schedules_despawn() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        let config = AutoPickupConfig::default();

        let result = on_entity_take_damage(&mut host, &config, Some(&barrel), Some(&hit(player, 12.0)));

        assert_eq!(result, HookResult::Suppress);
        assert_eq!(host.items_of(&player), vec![stack(100, "wood", 100)]);
        assert_eq!(host.containers[&7], vec![]);
        assert_eq!(host.scheduled.len(), 1);
        assert_eq!(host.scheduled[0].container_id, 7);
        assert_eq!(host.scheduled[0].category, ContainerCategory::Barrel);
        assert_eq!(host.scheduled[0].actor, player);
        assert_eq!(host.pending, vec![7]);
    }

    #[test]
    fn non_lethal_hit_is_skipped() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        let result = on_entity_take_damage(&mut host, &AutoPickupConfig::default(), Some(&barrel), Some(&hit(player, 4.0)));

        assert_eq!(result, HookResult::Continue);
        assert!(host.items_of(&player).is_empty());
        assert_eq!(host.containers[&7].len(), 1);
        assert!(host.scheduled.is_empty());
    }

    #[test]
    fn exact_kill_counts_as_lethal() {
        let (host, barrel, player) = barrel_setup(10.0);
        let decision = evaluate(&host, &AutoPickupConfig::default(), &barrel, &hit(player, 10.0), ContainerCategory::Barrel);
        assert!(matches!(decision, Decision::Transfer(_)));
    }

    #[test]
    fn insta_kill_bypasses_lethality() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        host.grant(player, "Barrel.InstaKill");
        let decision = evaluate(&host, &AutoPickupConfig::default(), &barrel, &hit(player, 1.0), ContainerCategory::Barrel);
        assert!(matches!(decision, Decision::Transfer(grant) if grant.actor.identity == player));
    }

    #[test]
    fn missing_on_permission_skips() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        host.grants.clear();
        host.grant(player, "RoadSign.On");
        let decision = evaluate(&host, &AutoPickupConfig::default(), &barrel, &hit(player, 50.0), ContainerCategory::Barrel);
        assert_eq!(decision, Decision::Skip);
    }

    #[test]
    fn range_boundary_is_inclusive() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        let config = AutoPickupConfig { auto_pickup_distance: 3.0, ..AutoPickupConfig::default() };

        host.add_actor(player, 3.0, 0.0);
        assert!(matches!(evaluate(&host, &config, &barrel, &hit(player, 20.0), ContainerCategory::Barrel), Decision::Transfer(_)));

        host.add_actor(player, 3.0001, 0.0);
        assert_eq!(evaluate(&host, &config, &barrel, &hit(player, 20.0), ContainerCategory::Barrel), Decision::Skip);
    }

    #[test]
    fn range_ignores_elevation() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        host.actors.insert(player, ActorSnapshot { identity: player, pos_x: 1.0, pos_y: 1.0, pos_z: 40.0 });
        let decision = evaluate(&host, &AutoPickupConfig::default(), &barrel, &hit(player, 20.0), ContainerCategory::Barrel);
        assert!(matches!(decision, Decision::Transfer(_)));
    }

    #[test]
    fn zero_threshold_disables_range_gate() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        host.add_actor(player, 5000.0, -5000.0);
        for distance in [0.0, -1.0] {
            let config = AutoPickupConfig { auto_pickup_distance: distance, ..AutoPickupConfig::default() };
            let decision = evaluate(&host, &config, &barrel, &hit(player, 20.0), ContainerCategory::Barrel);
            assert!(matches!(decision, Decision::Transfer(_)));
        }
    }

    #[test]
    fn last_attacker_takes_precedence_over_initiator() {
        let (mut host, mut barrel, player) = barrel_setup(10.0);
        let other = identity(2);
        host.add_actor(other, 0.5, 0.0);
        host.grant(other, "Barrel.On");
        barrel.last_attacker = Some(other);

        let decision = evaluate(&host, &AutoPickupConfig::default(), &barrel, &hit(player, 20.0), ContainerCategory::Barrel);
        assert!(matches!(decision, Decision::Transfer(grant) if grant.actor.identity == other));
    }

    #[test]
    fn unknown_last_attacker_falls_back_to_initiator() {
        let (host, mut barrel, player) = barrel_setup(10.0);
        barrel.last_attacker = Some(identity(9));
        let decision = evaluate(&host, &AutoPickupConfig::default(), &barrel, &hit(player, 20.0), ContainerCategory::Barrel);
        assert!(matches!(decision, Decision::Transfer(grant) if grant.actor.identity == player));
    }

    #[test]
    fn no_resolvable_actor_skips() {
        let (host, barrel, _) = barrel_setup(10.0);
        let anonymous = DamageEvent { container_id: 7, initiator: None, total_damage: 20.0 };
        assert_eq!(evaluate(&host, &AutoPickupConfig::default(), &barrel, &anonymous, ContainerCategory::Barrel), Decision::Skip);

        let stranger = DamageEvent { initiator: Some(identity(42)), ..anonymous };
        assert_eq!(evaluate(&host, &AutoPickupConfig::default(), &barrel, &stranger, ContainerCategory::Barrel), Decision::Skip);
    }

    #[test]
    fn missing_inventory_skips() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        host.containers.clear();
        let result = on_entity_take_damage(&mut host, &AutoPickupConfig::default(), Some(&barrel), Some(&hit(player, 20.0)));
        assert_eq!(result, HookResult::Continue);
        assert!(host.scheduled.is_empty());
    }

    #[test]
    fn missing_references_pass_through() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        let config = AutoPickupConfig::default();
        assert_eq!(on_entity_take_damage(&mut host, &config, None, Some(&hit(player, 20.0))), HookResult::Continue);
        assert_eq!(on_entity_take_damage(&mut host, &config, Some(&barrel), None), HookResult::Continue);
        assert!(host.items_of(&player).is_empty());
    }

    #[test]
    fn unrecognized_prefab_passes_through() {
        let (mut host, mut barrel, player) = barrel_setup(10.0);
        barrel.prefab_name = "crate_normal".to_string();
        let result = on_entity_take_damage(&mut host, &AutoPickupConfig::default(), Some(&barrel), Some(&hit(player, 20.0)));
        assert_eq!(result, HookResult::Continue);
        assert_eq!(host.containers[&7].len(), 1);
    }

    #[test]
    fn road_signs_use_their_own_permissions() {
        let (mut host, _, player) = barrel_setup(10.0);
        let sign = container(7, "roadsign4", 100.0);
        let result = on_entity_take_damage(&mut host, &AutoPickupConfig::default(), Some(&sign), Some(&hit(player, 150.0)));
        assert_eq!(result, HookResult::Continue);

        host.grant(player, "RoadSign.On");
        let result = on_entity_take_damage(&mut host, &AutoPickupConfig::default(), Some(&sign), Some(&hit(player, 150.0)));
        assert_eq!(result, HookResult::Suppress);
        assert_eq!(host.scheduled[0].category, ContainerCategory::RoadSign);
    }

    #[test]
    fn pending_container_gets_no_second_transfer() {
        let (mut host, mut barrel, player) = barrel_setup(10.0);
        barrel.despawn_pending = true;
        let result = on_entity_take_damage(&mut host, &AutoPickupConfig::default(), Some(&barrel), Some(&hit(player, 20.0)));
        assert_eq!(result, HookResult::Suppress);
        assert!(host.items_of(&player).is_empty());
        assert!(host.scheduled.is_empty());
    }

    #[test]
    fn failed_schedule_leaves_container_unflagged() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        host.refuse_schedule = true;

        let result = on_entity_take_damage(&mut host, &AutoPickupConfig::default(), Some(&barrel), Some(&hit(player, 20.0)));

        assert_eq!(result, HookResult::Suppress);
        assert!(host.scheduled.is_empty());
        assert!(host.pending.is_empty());
    }

    #[test]
    fn oversized_modifier_does_not_poison_later_bonus() {
        let (mut host, _, player) = barrel_setup(10.0);
        host.modifiers.insert(player, f32::MAX);
        host.containers.insert(7, vec![stack(1, SCRAP_ITEM_NAME, 2)]);
        let first = transfer_loot(&mut host, 7, &player);
        assert_eq!(first.bonus_units, 2 * MAX_MODIFIER_VALUE as u32);
        assert!(host.remainders[&player].is_finite());

        host.modifiers.insert(player, 0.5);
        host.containers.insert(8, vec![stack(2, SCRAP_ITEM_NAME, 4)]);
        let second = transfer_loot(&mut host, 8, &player);
        assert_eq!(second.bonus_units, 2);
        assert_eq!(host.remainders[&player], 0.0);
    }

    #[test]
    fn bonus_total_saturates_across_stacks() {
        let (mut host, _, player) = barrel_setup(10.0);
        host.modifiers.insert(player, 1e10);
        host.containers.insert(7, vec![stack(1, SCRAP_ITEM_NAME, u32::MAX), stack(2, SCRAP_ITEM_NAME, u32::MAX)]);

        let report = transfer_loot(&mut host, 7, &player);

        assert_eq!(report.bonus_units, u32::MAX);
        assert!(report.moved.iter().all(|s| s.quantity == u32::MAX));
    }

    #[test]
    fn scrap_bonus_accumulates_across_pickups() {
        let (mut host, _, player) = barrel_setup(10.0);
        host.modifiers.insert(player, 0.5);
        host.containers.insert(7, vec![stack(1, SCRAP_ITEM_NAME, 1), stack(2, "cloth", 3)]);

        let first = transfer_loot(&mut host, 7, &player);
        assert_eq!(first.bonus_units, 0);
        assert_eq!(host.remainders[&player], 0.5);

        host.containers.insert(8, vec![stack(3, SCRAP_ITEM_NAME, 1)]);
        let second = transfer_loot(&mut host, 8, &player);
        assert_eq!(second.bonus_units, 1);
        assert_eq!(second.moved, vec![stack(3, SCRAP_ITEM_NAME, 2)]);
        assert_eq!(host.remainders[&player], 0.0);
    }

    #[test]
    fn bonus_only_applies_to_scrap() {
        let (mut host, _, player) = barrel_setup(10.0);
        host.modifiers.insert(player, 2.0);
        let report = transfer_loot(&mut host, 7, &player);
        assert_eq!(report.bonus_units, 0);
        assert_eq!(host.items_of(&player), vec![stack(100, "wood", 100)]);
        assert!(host.remainders.is_empty());
    }

    #[test]
    fn failed_stack_leaves_container_alive() {
        let (mut host, barrel, player) = barrel_setup(10.0);
        host.containers.insert(7, vec![stack(1, "wood", 5), stack(2, "cloth", 5)]);
        host.refuse_item = Some(2);

        let result = on_entity_take_damage(&mut host, &AutoPickupConfig::default(), Some(&barrel), Some(&hit(player, 20.0)));

        assert_eq!(result, HookResult::Suppress);
        assert_eq!(host.items_of(&player), vec![stack(1, "wood", 5)]);
        assert_eq!(host.containers[&7], vec![stack(2, "cloth", 5)]);
        assert!(host.scheduled.is_empty());
    }

    #[test]
    fn drained_quantities_are_preserved() {
        let (mut host, _, player) = barrel_setup(10.0);
        let contents = vec![stack(1, "wood", 100), stack(2, "metal_fragments", 35), stack(3, "rope", 1)];
        host.containers.insert(7, contents.clone());

        let report = transfer_loot(&mut host, 7, &player);

        assert!(report.emptied);
        assert_eq!(report.moved, contents);
        let received: u32 = host.items_of(&player).iter().map(|s| s.quantity).sum();
        assert_eq!(received, 136);
    }
}
