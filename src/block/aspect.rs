use std::collections::BTreeMap;

use serde::Deserialize;

use crate::block::BlockId;
use crate::chunk::Chunk;
use crate::coords::{BlockIndex, BlockXyz, ChunkXz, SubChunkXyz};
use crate::entity::EntityId;
use crate::err::WorldError;
use crate::inventory::{Click, Inventory, ItemStack, ItemTypeId, Slot, TxState, WindowId, WindowKind, MAX_STACK};
use crate::shard::ShardContext;

pub(crate) const FURNACE_INPUT: usize = 0;
pub(crate) const FURNACE_FUEL: usize = 1;
pub(crate) const FURNACE_OUTPUT: usize = 2;
const FURNACE_SLOTS: usize = 3;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub(crate) struct SmeltRecipe {
    pub(crate) input: i16,
    pub(crate) output: i16,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize)]
pub(crate) struct Fuel {
    pub(crate) item: i16,
    pub(crate) burn_ticks: u32,
}

/**
 * How a block type reacts to players and ticks. Block types that own an inventory say so through
 * their variant; see [`Aspect::window_kind`].
 */
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum Aspect {
    /// Cannot be dug or used, e.g. air, fluids and bedrock.
    Void,
    Standard {
        #[serde(default)]
        drop: Option<i16>,
    },
    Chest {
        slots: usize,
    },
    Workbench {
        slots: usize,
    },
    Furnace {
        cook_ticks: u32,
        #[serde(default)]
        recipes: Vec<SmeltRecipe>,
        #[serde(default)]
        fuels: Vec<Fuel>,
    },
}

impl Default for Aspect {
    fn default() -> Self {
        Aspect::Standard { drop: None }
    }
}

/// One occurrence of a block, built for the duration of a single behaviour call.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct BlockInstance {
    pub(crate) chunk: ChunkXz,
    pub(crate) at: BlockXyz,
    pub(crate) sub: SubChunkXyz,
    pub(crate) index: BlockIndex,
    pub(crate) block: BlockId,
    pub(crate) metadata: u8,
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct FurnaceState {
    pub(crate) burn_left: u32,
    pub(crate) cook_progress: u32,
}

/// The inventory of a chest, workbench or furnace, along with who has it open.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct BlockInventory {
    pub(crate) kind: WindowKind,
    pub(crate) inventory: Inventory,
    pub(crate) viewers: BTreeMap<EntityId, WindowId>,
    pub(crate) furnace: FurnaceState,
}

impl BlockInventory {
    pub(crate) fn new(kind: WindowKind, slots: usize) -> Self {
        Self {
            kind,
            inventory: Inventory::new(slots),
            viewers: BTreeMap::new(),
            furnace: FurnaceState::default(),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct FurnaceStep {
    pub(crate) keep_ticking: bool,
    pub(crate) changed: bool,
}

impl Aspect {
    pub(crate) fn window_kind(&self) -> Option<(WindowKind, usize)> {
        match self {
            Aspect::Void | Aspect::Standard { .. } => None,
            Aspect::Chest { slots } => Some((WindowKind::Chest, *slots)),
            Aspect::Workbench { slots } => Some((WindowKind::Workbench, *slots)),
            Aspect::Furnace { .. } => Some((WindowKind::Furnace, FURNACE_SLOTS)),
        }
    }

    /**
     * A player digs the block. Returns false if the block cannot be dug.
     */
    pub(crate) fn hit(
        &self,
        chunk: &mut Chunk,
        block: &BlockInstance,
        ctx: &mut ShardContext,
    ) -> Result<bool, WorldError> {
        let drop = match self {
            Aspect::Void => return Ok(false),
            Aspect::Standard { drop } => drop.map(ItemTypeId),
            _ => Some(ItemTypeId(block.block.0 as i16)),
        };
        self.destroy(chunk, block, ctx)?;
        chunk.set_block(block.index, crate::block::AIR, 0);
        if let Some(item) = drop {
            chunk.spawn_item(block.at.drop_position(), ItemStack::new(item, 1, 0), ctx)?;
        }
        Ok(true)
    }

    /**
     * A player uses the block. Blocks with an inventory open it as the given window. Returns false
     * if the block has no use, in which case the caller may place a block against it instead.
     */
    pub(crate) fn interact(
        &self,
        chunk: &mut Chunk,
        block: &BlockInstance,
        player: EntityId,
        window: WindowId,
    ) -> Result<bool, WorldError> {
        match self.window_kind() {
            Some((kind, slots)) => {
                chunk.open_window(block.index, kind, slots, player, window)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub(crate) fn inventory_click(
        &self,
        chunk: &mut Chunk,
        block: &BlockInstance,
        player: EntityId,
        click: &Click,
        cursor: &mut Slot,
    ) -> Result<TxState, WorldError> {
        if self.window_kind().is_none() {
            return Err(WorldError::NotFound(format!("inventory at {}", block.at)));
        }
        let state = chunk.click_block_inventory(block.index, player, click, cursor)?;
        if state == TxState::Accepted && matches!(self, Aspect::Furnace { .. }) {
            chunk.add_active_block(block.index);
        }
        Ok(state)
    }

    /**
     * Called before the block is removed. Inventories are closed and their contents dropped.
     */
    pub(crate) fn destroy(
        &self,
        chunk: &mut Chunk,
        block: &BlockInstance,
        ctx: &mut ShardContext,
    ) -> Result<(), WorldError> {
        if let Some(mut inventory) = chunk.remove_inventory(block.index) {
            for stack in inventory.inventory.drain() {
                chunk.spawn_item(block.at.drop_position(), stack, ctx)?;
            }
        }
        Ok(())
    }

    /**
     * Runs once per tick for active blocks. Returns whether the block still needs ticking.
     */
    pub(crate) fn tick(&self, chunk: &mut Chunk, block: &BlockInstance) -> bool {
        let Aspect::Furnace {
            cook_ticks,
            recipes,
            fuels,
        } = self
        else {
            return false;
        };
        let Some(inventory) = chunk.block_inventory_mut(block.index) else {
            return false;
        };
        let step = smelt(inventory, *cook_ticks, recipes, fuels);
        if step.changed {
            chunk.broadcast_inventory(block.index);
        }
        step.keep_ticking
    }
}

fn smelt_output(inventory: &Inventory, recipes: &[SmeltRecipe]) -> Option<ItemStack> {
    let input = inventory.slot(FURNACE_INPUT)?;
    let recipe = recipes.iter().find(|r| r.input == input.item.0)?;
    let output = ItemStack::new(ItemTypeId(recipe.output), 1, 0);
    match inventory.slot(FURNACE_OUTPUT) {
        None => Some(output),
        Some(held) if held.stacks_with(&output) && held.count < MAX_STACK => Some(output),
        Some(_) => None,
    }
}

fn fuel<'a>(inventory: &Inventory, fuels: &'a [Fuel]) -> Option<&'a Fuel> {
    let held = inventory.slot(FURNACE_FUEL)?;
    fuels.iter().find(|f| f.item == held.item.0)
}

/**
 * Advances a furnace by one tick. Fuel is only consumed while there is something to smelt.
 */
pub(crate) fn smelt(
    block: &mut BlockInventory,
    cook_ticks: u32,
    recipes: &[SmeltRecipe],
    fuels: &[Fuel],
) -> FurnaceStep {
    let inventory = &mut block.inventory;
    let state = &mut block.furnace;
    let output = smelt_output(inventory, recipes);
    let mut changed = false;

    if state.burn_left == 0 && output.is_some() {
        if let Some(fuel) = fuel(inventory, fuels) {
            state.burn_left = fuel.burn_ticks;
            inventory.take_from_slot(FURNACE_FUEL, 1);
            changed = true;
        }
    }

    match output {
        Some(output) if state.burn_left > 0 => {
            state.burn_left -= 1;
            state.cook_progress += 1;
            if state.cook_progress >= cook_ticks {
                state.cook_progress = 0;
                inventory.take_from_slot(FURNACE_INPUT, 1);
                inventory.add_to_slot(FURNACE_OUTPUT, output);
                changed = true;
            }
        }
        _ => {
            state.burn_left = state.burn_left.saturating_sub(1);
            state.cook_progress = 0;
        }
    }

    let ready = smelt_output(inventory, recipes).is_some() && fuel(inventory, fuels).is_some();
    FurnaceStep {
        keep_ticking: state.burn_left > 0 || ready,
        changed,
    }
}
