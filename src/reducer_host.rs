/*
 * src/reducer_host.rs
 *
 * Purpose: Backs the auto pickup collaborator traits with module tables, so the
 *          rules in `auto_pickup` and `container_despawn` run inside reducers.
 */

use spacetimedb::{Identity, ReducerContext, Table};
use log;

use crate::auto_pickup::{ActorDirectory, ActorSnapshot, LootInventory};
use crate::container_despawn::{schedule_container_despawn, ContainerDeathNotice, ContainerLifecycle, DespawnJob, TickScheduler};
use crate::items::{container_items, give_item_to_player, ItemStack};
use crate::loot_container::LootContainer;
use crate::models::{DestroyMode, ModifierKind};
use crate::permissions::{player_has_permission, PermissionService};
use crate::yield_modifier::{active_modifier_value, carried_remainder, store_carried_remainder, YieldLedger};

// Table traits
use crate::container_despawn::container_death_notice as ContainerDeathNoticeTableTrait;
use crate::items::inventory_item as InventoryItemTableTrait;
use crate::loot_container::loot_container as LootContainerTableTrait;
use crate::player as PlayerTableTrait;

pub struct ReducerHost<'a> {
    ctx: &'a ReducerContext,
}

impl<'a> ReducerHost<'a> {
    pub fn new(ctx: &'a ReducerContext) -> Self {
        Self { ctx }
    }

    fn live_container(&self, container_id: u64) -> Option<LootContainer> {
        self.ctx.db.loot_container().id().find(container_id).filter(|c| !c.is_destroyed)
    }
}

impl ActorDirectory for ReducerHost<'_> {
    fn find_actor(&self, identity: &Identity) -> Option<ActorSnapshot> {
        self.ctx.db.player().identity().find(identity).map(|player| ActorSnapshot {
            identity: player.identity,
            pos_x: player.position_x,
            pos_y: player.position_y,
            pos_z: player.position_z,
        })
    }
}

impl PermissionService for ReducerHost<'_> {
    fn has_permission(&self, actor: &Identity, permission: &str) -> bool {
        player_has_permission(self.ctx, actor, permission)
    }
}

impl LootInventory for ReducerHost<'_> {
    fn container_stacks(&self, container_id: u64) -> Option<Vec<ItemStack>> {
        self.live_container(container_id)?;
        Some(container_items(self.ctx, container_id).iter().map(ItemStack::from).collect())
    }

    fn give_stack(&mut self, container_id: u64, stack: &ItemStack, quantity: u32, actor: &Identity) -> Result<(), String> {
        let item = self.ctx.db.inventory_item().instance_id().find(stack.instance_id)
            .ok_or_else(|| format!("Item instance {} not found", stack.instance_id))?;
        if item.location.is_container_bound() != Some(container_id) {
            return Err(format!("Item {} is no longer in container {}", stack.instance_id, container_id));
        }
        give_item_to_player(self.ctx, item, quantity, *actor)
    }
}

impl YieldLedger for ReducerHost<'_> {
    fn modifier_value(&self, actor: &Identity, kind: ModifierKind) -> Option<f32> {
        active_modifier_value(self.ctx, actor, kind)
    }

    fn carried_remainder(&self, actor: &Identity, kind: ModifierKind) -> f32 {
        carried_remainder(self.ctx, actor, kind)
    }

    fn set_carried_remainder(&mut self, actor: &Identity, kind: ModifierKind, carried: f32) {
        store_carried_remainder(self.ctx, actor, kind, carried);
    }
}

impl TickScheduler for ReducerHost<'_> {
    fn schedule_next_tick(&mut self, job: DespawnJob) -> Result<(), String> {
        self.live_container(job.container_id)
            .ok_or_else(|| format!("Container {} disappeared before despawn could be queued", job.container_id))?;
        schedule_container_despawn(self.ctx, job)
    }
}

impl ContainerLifecycle for ReducerHost<'_> {
    fn is_container_live(&self, container_id: u64) -> bool {
        self.live_container(container_id).is_some()
    }

    fn mark_despawn_pending(&mut self, container_id: u64) {
        if let Some(mut container) = self.live_container(container_id) {
            container.despawn_pending = true;
            self.ctx.db.loot_container().id().update(container);
        }
    }

    fn broadcast_entity_death(&mut self, job: &DespawnJob) {
        let Some(container) = self.live_container(job.container_id) else {
            return;
        };
        let notice = ContainerDeathNotice {
            id: 0,
            container_id: container.id,
            prefab_name: container.prefab_name,
            category: job.category,
            pos_x: container.pos_x,
            pos_y: container.pos_y,
            killer: job.actor,
            initiator: job.initiator,
            total_damage: job.total_damage,
            died_at: self.ctx.timestamp,
        };
        if let Err(e) = self.ctx.db.container_death_notice().try_insert(notice) {
            log::warn!("[Despawn] Failed to publish death of container {}: {}", job.container_id, e);
        }
    }

    fn destroy_container(&mut self, container_id: u64, mode: DestroyMode) -> bool {
        let containers = self.ctx.db.loot_container();
        let Some(mut container) = self.live_container(container_id) else {
            return false;
        };

        // Anything still inside goes with the container.
        let inventory = self.ctx.db.inventory_item();
        for item in container_items(self.ctx, container_id) {
            inventory.instance_id().delete(item.instance_id);
        }

        // Update one last time so subscribers see how it died, then delete the row.
        container.is_destroyed = true;
        container.destroyed_with_gibs = mode == DestroyMode::Gib;
        containers.id().update(container);
        containers.id().delete(container_id);
        true
    }
}
