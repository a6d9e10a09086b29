use async_trait::async_trait;

pub(crate) const MAX_STACK: u8 = 64;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct ItemTypeId(pub(crate) i16);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ItemStack {
    pub(crate) item: ItemTypeId,
    pub(crate) count: u8,
    pub(crate) data: i16,
}

impl ItemStack {
    pub(crate) fn new(item: ItemTypeId, count: u8, data: i16) -> Self {
        Self { item, count, data }
    }

    pub(crate) fn stacks_with(&self, other: &ItemStack) -> bool {
        self.item == other.item && self.data == other.data
    }

    fn with_count(&self, count: u8) -> Slot {
        if count == 0 {
            None
        } else {
            Some(ItemStack { count, ..*self })
        }
    }
}

pub(crate) type Slot = Option<ItemStack>;

/// Window id as chosen by the player's connection when the window was opened.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct WindowId(pub(crate) i8);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct TxId(pub(crate) i16);

/// The kind of window a block inventory opens as.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum WindowKind {
    Chest,
    Workbench,
    Furnace,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum TxState {
    Accepted,
    Rejected,
    /// The click was forwarded to the actor owning the inventory. The outcome arrives later as a
    /// transaction result notice.
    Deferred,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct Click {
    pub(crate) window: WindowId,
    pub(crate) slot: usize,
    /// What the player believes the slot holds. Clicks against stale contents are rejected.
    pub(crate) expected: Slot,
    pub(crate) right_click: bool,
    pub(crate) tx_id: TxId,
}

#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Inventory {
    slots: Vec<Slot>,
}

impl Inventory {
    pub(crate) fn new(size: usize) -> Self {
        Self {
            slots: vec![None; size],
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    pub(crate) fn slot(&self, index: usize) -> Slot {
        self.slots.get(index).copied().flatten()
    }

    pub(crate) fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub(crate) fn set_slot(&mut self, index: usize, slot: Slot) -> bool {
        match self.slots.get_mut(index) {
            Some(s) => {
                *s = slot;
                true
            }
            None => false,
        }
    }

    /**
     * Adds as much of `stack` as fits into the given slot and returns the remainder.
     */
    pub(crate) fn add_to_slot(&mut self, index: usize, stack: ItemStack) -> Slot {
        let Some(slot) = self.slots.get_mut(index) else {
            return Some(stack);
        };
        match slot {
            None => {
                *slot = Some(stack);
                None
            }
            Some(existing) if existing.stacks_with(&stack) => {
                let moved = stack.count.min(MAX_STACK.saturating_sub(existing.count));
                existing.count += moved;
                stack.with_count(stack.count - moved)
            }
            Some(_) => Some(stack),
        }
    }

    /**
     * Removes `count` items from the slot, returning false if the slot held fewer.
     */
    pub(crate) fn take_from_slot(&mut self, index: usize, count: u8) -> bool {
        let Some(slot) = self.slots.get_mut(index) else {
            return false;
        };
        match *slot {
            Some(stack) if stack.count >= count => {
                *slot = stack.with_count(stack.count - count);
                true
            }
            _ => false,
        }
    }

    /// Empties the inventory, returning everything it held.
    pub(crate) fn drain(&mut self) -> Vec<ItemStack> {
        self.slots.iter_mut().filter_map(|slot| slot.take()).collect()
    }

    /**
     * Applies a window click against this inventory. The click is rejected, leaving both the slot
     * and the cursor untouched, when the slot does not hold what the player expected.
     */
    pub(crate) fn apply_click(&mut self, click: &Click, cursor: &mut Slot) -> TxState {
        let Some(slot) = self.slots.get_mut(click.slot) else {
            return TxState::Rejected;
        };
        if *slot != click.expected {
            return TxState::Rejected;
        }

        let (new_slot, new_cursor) = match (*slot, *cursor, click.right_click) {
            (None, None, _) => (None, None),
            (Some(held), None, false) => (None, Some(held)),
            (Some(held), None, true) => {
                let taken = held.count - held.count / 2;
                (held.with_count(held.count - taken), held.with_count(taken))
            }
            (None, Some(carried), false) => (Some(carried), None),
            (None, Some(carried), true) => (carried.with_count(1), carried.with_count(carried.count - 1)),
            (Some(held), Some(carried), right_click) if held.stacks_with(&carried) => {
                let room = MAX_STACK.saturating_sub(held.count);
                let moved = if right_click { 1u8.min(room) } else { carried.count.min(room) };
                (
                    held.with_count(held.count + moved),
                    carried.with_count(carried.count - moved),
                )
            }
            (Some(held), Some(carried), _) => (Some(carried), Some(held)),
        };
        *slot = new_slot;
        *cursor = new_cursor;
        TxState::Accepted
    }
}

/**
 * An inventory a player can click on. Implementations either apply the click right away or
 * forward it to whichever actor owns the inventory.
 *
 * The connection layer holds one of these per open window and feeds it the decoded clicks.
 */
#[async_trait]
pub(crate) trait InventoryAccess: Send {
    async fn click(&mut self, click: Click, cursor: &mut Slot) -> TxState;
}

#[async_trait]
impl InventoryAccess for Inventory {
    async fn click(&mut self, click: Click, cursor: &mut Slot) -> TxState {
        self.apply_click(&click, cursor)
    }
}
