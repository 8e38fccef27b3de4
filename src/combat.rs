/******************************************************************************
 *                                                                            *
 * Damage against loot containers. `hit_loot_container` is the event source *
 * for auto pickup: it builds the damage event, lets the pickup hook look at *
 * it first and only runs the default handling (health loss, destruction    *
 * and scattering the contents on the ground) when the hook has no opinion. *
 *                                                                            *
 ******************************************************************************/

use spacetimedb::{Identity, ReducerContext, Timestamp};
use rand::Rng;
use log;

use crate::auto_pickup::{on_entity_take_damage, DamageEvent, HookResult};
use crate::config::current_config;
use crate::dropped_item::{create_dropped_item_entity, DROP_SCATTER_RADIUS};
use crate::items::container_items;
use crate::loot_container::LootContainer;
use crate::reducer_host::ReducerHost;

use crate::items::inventory_item as InventoryItemTableTrait;
use crate::loot_container::loot_container as LootContainerTableTrait;
use crate::player as PlayerTableTrait;

/// Upper bound on a single hit, matches the heaviest melee tool.
pub const MAX_HIT_DAMAGE: f32 = 500.0;

/// A player hits a loot container.
#[spacetimedb::reducer]
pub fn hit_loot_container(ctx: &ReducerContext, container_id: u64, damage: f32) -> Result<(), String> {
    let attacker_id = ctx.sender;
    ctx.db.player().identity().find(attacker_id)
        .ok_or_else(|| "Player not found.".to_string())?;

    if !damage.is_finite() || damage <= 0.0 || damage > MAX_HIT_DAMAGE {
        return Err(format!("Invalid damage amount {}.", damage));
    }

    let container = ctx.db.loot_container().id().find(container_id)
        .ok_or_else(|| format!("Loot container {} not found.", container_id))?;
    if container.is_destroyed {
        return Err(format!("Loot container {} is already destroyed.", container_id));
    }

    let hit = DamageEvent { container_id, initiator: Some(attacker_id), total_damage: damage };
    let config = current_config(ctx);
    let mut host = ReducerHost::new(ctx);

    match on_entity_take_damage(&mut host, &config, Some(&container), Some(&hit)) {
        HookResult::Suppress => {
            log::debug!("[Combat] Hit on container {} handled by auto pickup.", container_id);
            Ok(())
        }
        HookResult::Continue => damage_loot_container(ctx, container, attacker_id, damage, ctx.timestamp),
    }
}

/// Default damage handling: applies damage and, on death, destroys the container
/// and scatters its contents as dropped items.
pub fn damage_loot_container(
    ctx: &ReducerContext,
    mut container: LootContainer,
    attacker_id: Identity,
    damage: f32,
    timestamp: Timestamp,
) -> Result<(), String> {
    let containers = ctx.db.loot_container();
    let container_id = container.id;

    let old_health = container.health;
    container.health = (container.health - damage).max(0.0);
    container.last_attacker = Some(attacker_id);
    container.last_hit_time = Some(timestamp);

    log::info!(
        "Player {:?} hit loot container {} for {:.1} damage. Health: {:.1} -> {:.1}",
        attacker_id, container_id, damage, old_health, container.health
    );

    if container.health > 0.0 {
        containers.id().update(container);
        return Ok(());
    }

    let contents = container_items(ctx, container_id);
    let inventory = ctx.db.inventory_item();
    let mut rng = ctx.rng();
    for item in &contents {
        let offset_x = rng.gen_range(-DROP_SCATTER_RADIUS..DROP_SCATTER_RADIUS);
        let offset_y = rng.gen_range(-DROP_SCATTER_RADIUS..DROP_SCATTER_RADIUS);
        match create_dropped_item_entity(ctx, &item.item_name, item.quantity, container.pos_x + offset_x, container.pos_y + offset_y) {
            Ok(_) => {
                inventory.instance_id().delete(item.instance_id);
            }
            Err(e) => log::error!("Failed to drop {} from destroyed container {}: {}", item.item_name, container_id, e),
        }
    }

    // Update one last time so subscribers see the destruction, then delete the row.
    container.is_destroyed = true;
    container.destroyed_with_gibs = true;
    containers.id().update(container);
    containers.id().delete(container_id);
    log::info!("Loot container {} destroyed by player {:?}. Dropped {} stacks.", container_id, attacker_id, contents.len());
    Ok(())
}
