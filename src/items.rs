use spacetimedb::{Identity, ReducerContext, Table};
use log;

use crate::models::{ItemLocation, InventoryLocationData, ContainerLocationData};

/// Short name of the resource that earns bonus yield on pickup.
pub const SCRAP_ITEM_NAME: &str = "scrap";

// --- Inventory Table ---

// Represents one stack of a resource, wherever it currently is
#[spacetimedb::table(name = inventory_item, public)]
#[derive(Clone, Debug)]
pub struct InventoryItem {
    #[primary_key]
    #[auto_inc]
    pub instance_id: u64,      // Unique ID for this specific item instance
    pub item_name: String,     // Resource short name, e.g. "scrap", "wood"
    pub quantity: u32,         // How many of this item
    pub location: ItemLocation,
}

/// Plain view of a stack, detached from the table.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ItemStack {
    pub instance_id: u64,
    pub item_name: String,
    pub quantity: u32,
}

impl From<&InventoryItem> for ItemStack {
    fn from(item: &InventoryItem) -> Self {
        Self { instance_id: item.instance_id, item_name: item.item_name.clone(), quantity: item.quantity }
    }
}

/// Stacks held by a container, in slot order.
pub(crate) fn container_items(ctx: &ReducerContext, container_id: u64) -> Vec<InventoryItem> {
    let mut items: Vec<(u8, InventoryItem)> = ctx.db.inventory_item().iter()
        .filter_map(|item| match &item.location {
            ItemLocation::Container(data) if data.container_id == container_id => Some((data.slot_index, item.clone())),
            _ => None,
        })
        .collect();
    items.sort_by_key(|(slot, _)| *slot);
    items.into_iter().map(|(_, item)| item).collect()
}

/// Inserts a new stack into a container slot.
pub(crate) fn add_item_to_container(
    ctx: &ReducerContext,
    container_id: u64,
    slot_index: u8,
    item_name: &str,
    quantity: u32,
) -> Result<u64, String> {
    let inserted = ctx.db.inventory_item().try_insert(InventoryItem {
        instance_id: 0,
        item_name: item_name.to_string(),
        quantity,
        location: ItemLocation::Container(ContainerLocationData { container_id, slot_index }),
    }).map_err(|e| format!("Failed to insert {} into container {}: {}", item_name, container_id, e))?;
    Ok(inserted.instance_id)
}

/// Moves a stack into a player's inventory. Merges into an existing stack of the same
/// resource when there is one, otherwise the row itself is relocated.
/// `quantity` replaces the stack's quantity, so callers can pass an adjusted amount.
pub(crate) fn give_item_to_player(
    ctx: &ReducerContext,
    mut item: InventoryItem,
    quantity: u32,
    player_id: Identity,
) -> Result<(), String> {
    let inventory = ctx.db.inventory_item();

    let existing = inventory.iter().find(|other| {
        other.instance_id != item.instance_id
            && other.item_name == item.item_name
            && other.location.is_player_bound() == Some(player_id)
    });

    match existing {
        Some(mut stack) => {
            stack.quantity = stack.quantity.saturating_add(quantity);
            log::debug!("[GiveItem] Merged {} x{} (instance {}) into stack {} of {:?}",
                item.item_name, quantity, item.instance_id, stack.instance_id, player_id);
            inventory.instance_id().update(stack);
            inventory.instance_id().delete(item.instance_id);
        }
        None => {
            item.quantity = quantity;
            item.location = ItemLocation::Inventory(InventoryLocationData { owner_id: player_id });
            log::debug!("[GiveItem] Moved {} x{} (instance {}) into inventory of {:?}",
                item.item_name, quantity, item.instance_id, player_id);
            inventory.instance_id().update(item);
        }
    }
    Ok(())
}

/// Adds a fresh stack to a player, e.g. from a dropped item.
pub(crate) fn add_item_to_player_inventory(ctx: &ReducerContext, player_id: Identity, item_name: &str, quantity: u32) -> Result<(), String> {
    let inserted = ctx.db.inventory_item().try_insert(InventoryItem {
        instance_id: 0,
        item_name: item_name.to_string(),
        quantity,
        location: ItemLocation::Unknown,
    }).map_err(|e| format!("Failed to create {} for player: {}", item_name, e))?;
    give_item_to_player(ctx, inserted, quantity, player_id)
}
