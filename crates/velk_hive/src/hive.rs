//! The hive slab allocator
//!
//! A hive stores objects of a single class in contiguous pages, popping
//! slots from an intrusive free list threaded through the slot bytes.
//! Removal is a two-step lifecycle: a removed object becomes a zombie
//! while external strong references remain, and its slot is reclaimed by
//! the control block's destroy callback when the last reference drops.
//! A dropped hive with surviving zombies hands each affected page to an
//! orphan destroy path that frees the page with the last zombie.

use std::alloc::{alloc, dealloc, Layout};
use std::cell::{Cell, RefCell};
use std::ptr::{self, NonNull};
use std::rc::Rc;

use tracing::trace;
use velk_core::{
    release, ControlBlock, DestroyPhase, ExternalControlBlock, IInterface, IObject,
    IObjectFactory, InterfaceExt, ObjectCore, ObjectFlags, Ref, ReturnValue, Uid,
};

const SENTINEL: usize = usize::MAX;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
enum SlotState {
    Active,
    Zombie,
    Free,
}

/// One page of slots. Never moves once allocated; control blocks hold
/// raw pointers into it.
struct HivePage {
    slots: NonNull<u8>,
    layout: Layout,
    state: Box<[Cell<SlotState>]>,
    blocks: Box<[Cell<*mut HiveControlBlock>]>,
    objects: Box<[Cell<Option<NonNull<dyn IInterface>>>]>,
    capacity: usize,
    slot_size: usize,
    /// Intrusive free-list head; `SENTINEL` when full.
    free_head: Cell<usize>,
    /// Active + zombie slots on this page.
    live_count: Cell<usize>,
}

impl HivePage {
    fn new(capacity: usize, slot_size: usize, slot_align: usize) -> Box<HivePage> {
        let layout = Layout::from_size_align(capacity * slot_size, slot_align)
            .expect("hive page layout");
        let slots = NonNull::new(unsafe { alloc(layout) }).expect("hive page allocation");

        let page = Box::new(HivePage {
            slots,
            layout,
            state: (0..capacity).map(|_| Cell::new(SlotState::Free)).collect(),
            blocks: (0..capacity).map(|_| Cell::new(ptr::null_mut())).collect(),
            objects: (0..capacity).map(|_| Cell::new(None)).collect(),
            capacity,
            slot_size,
            free_head: Cell::new(0),
            live_count: Cell::new(0),
        });

        // Thread the free list through the slot bytes.
        for index in 0..capacity - 1 {
            unsafe { ptr::write_unaligned(page.slot_ptr(index) as *mut usize, index + 1) };
        }
        unsafe {
            ptr::write_unaligned(page.slot_ptr(capacity - 1) as *mut usize, SENTINEL);
        }
        page
    }

    fn slot_ptr(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.capacity);
        unsafe { self.slots.as_ptr().add(index * self.slot_size) }
    }

    fn pop_free(&self) -> Option<usize> {
        let head = self.free_head.get();
        if head == SENTINEL {
            return None;
        }
        let next = unsafe { ptr::read_unaligned(self.slot_ptr(head) as *const usize) };
        self.free_head.set(next);
        Some(head)
    }

    fn push_free(&self, index: usize) {
        unsafe {
            ptr::write_unaligned(self.slot_ptr(index) as *mut usize, self.free_head.get());
        }
        self.free_head.set(index);
    }
}

impl Drop for HivePage {
    fn drop(&mut self) {
        unsafe { dealloc(self.slots.as_ptr(), self.layout) };
    }
}

/// Control block of a hive-resident object, embedding the slot context
/// the destroy callback needs for reclamation.
#[repr(C)]
struct HiveControlBlock {
    ecb: ExternalControlBlock,
    page: *mut HivePage,
    slot_index: usize,
    slot_size: usize,
    factory: Rc<dyn IObjectFactory>,
}

unsafe fn destroy_normal(ecb: *mut ExternalControlBlock, phase: DestroyPhase) {
    destroy_impl(ecb, phase, false);
}

unsafe fn destroy_orphan(ecb: *mut ExternalControlBlock, phase: DestroyPhase) {
    destroy_impl(ecb, phase, true);
}

/// Reclaims a slot when the last strong reference drops, and the block
/// itself when the last weak reference drops. The orphan variant
/// additionally frees the page once its last object is gone.
unsafe fn destroy_impl(ecb: *mut ExternalControlBlock, phase: DestroyPhase, orphan: bool) {
    let hcb = ecb as *mut HiveControlBlock;
    if phase == DestroyPhase::Block {
        drop(Box::from_raw(hcb));
        return;
    }

    let page = (*hcb).page;
    let slot_index = (*hcb).slot_index;
    let slot_size = (*hcb).slot_size;
    let factory = (*hcb).factory.clone();
    let block = &(*hcb).ecb.block as *const ControlBlock;

    // Guard weak: keeps the block alive through the destructor chain,
    // which releases the object's self-weak.
    (*block).add_weak();
    let slot = (*page).slots.as_ptr().add(slot_index * slot_size);
    factory.destroy_in_place(slot);

    // Strong set's shared weak; the guard prevents it from being last.
    let was_last = (*block).release_weak();
    debug_assert!(!was_last);
    // Guard release: when last, the block is ours to free. Residual
    // weak handles otherwise free it later through the Block phase.
    if (*block).release_weak() {
        drop(Box::from_raw(hcb));
    }

    (*page).state[slot_index].set(SlotState::Free);
    (*page).blocks[slot_index].set(ptr::null_mut());
    (*page).objects[slot_index].set(None);
    if !orphan {
        (*page).push_free(slot_index);
    }
    (*page).live_count.set((*page).live_count.get() - 1);

    if orphan && (*page).live_count.get() == 0 {
        drop(Box::from_raw(page));
    }
}

fn next_page_capacity(page_count: usize) -> usize {
    match page_count {
        0 => 16,
        1 => 64,
        2 => 256,
        _ => 1024,
    }
}

fn align_up(size: usize, alignment: usize) -> usize {
    (size + alignment - 1) & !(alignment - 1)
}

velk_core::interface! {
    /// Slab storage for instances of one class.
    pub trait IHive: IInterface {
        /// Binds the hive to a registered class. One-shot; fails when
        /// the class is unknown or the hive is already initialized.
        fn init(&self, class_uid: Uid) -> ReturnValue;

        fn element_class_uid(&self) -> Uid;

        /// Number of active (not removed) objects.
        fn size(&self) -> usize;

        fn is_empty(&self) -> bool;

        /// Constructs a new object in a free slot. The hive keeps one
        /// strong reference; the returned handle is the caller's.
        fn add(&self) -> Option<Ref<dyn IObject>>;

        /// Removes an object: its slot turns zombie until the last
        /// external strong reference drops. `Fail` when the object is
        /// not an active resident.
        fn remove(&self, object: &dyn IObject) -> ReturnValue;

        /// Whether the object is an active resident of this hive.
        fn contains(&self, object: &dyn IObject) -> bool;

        /// Visits active objects in page-then-slot order; stops early
        /// when the visitor returns false.
        fn for_each(&self, visitor: &mut dyn FnMut(&dyn IObject) -> bool);
    }
}

/// Slab allocator for one class.
#[derive(Default)]
pub struct Hive {
    core: ObjectCore,
    element_uid: Cell<Uid>,
    factory: RefCell<Option<Rc<dyn IObjectFactory>>>,
    slot_size: Cell<usize>,
    slot_align: Cell<usize>,
    /// Active objects across all pages.
    live: Cell<usize>,
    pages: RefCell<Vec<Box<HivePage>>>,
}

velk_core::object_class! {
    pub class Hive {
        name: "velk.Hive",
        core: core,
        implements: [crate::hive::IHive],
    }
}

impl Hive {
    /// Locates the active slot holding `addr`.
    fn find_slot(&self, addr: usize) -> Option<(*mut HivePage, usize)> {
        let slot_size = self.slot_size.get();
        if slot_size == 0 {
            return None;
        }
        let pages = self.pages.borrow();
        for page in pages.iter() {
            let base = page.slots.as_ptr() as usize;
            let end = base + page.capacity * slot_size;
            if addr < base || addr >= end {
                continue;
            }
            let offset = addr - base;
            if offset % slot_size != 0 {
                return None;
            }
            let index = offset / slot_size;
            if page.state[index].get() != SlotState::Active {
                return None;
            }
            return Some((&**page as *const HivePage as *mut HivePage, index));
        }
        None
    }
}

impl IHive for Hive {
    fn init(&self, class_uid: Uid) -> ReturnValue {
        if self.factory.borrow().is_some() {
            return ReturnValue::Fail;
        }
        let Some(factory) = velk_core::instance().type_registry().find_factory(class_uid)
        else {
            return ReturnValue::Fail;
        };
        let slot_size = align_up(factory.instance_size(), factory.instance_alignment())
            .max(std::mem::size_of::<usize>());
        self.slot_size.set(slot_size);
        self.slot_align.set(factory.instance_alignment());
        self.element_uid.set(class_uid);
        *self.factory.borrow_mut() = Some(factory);
        ReturnValue::Success
    }

    fn element_class_uid(&self) -> Uid {
        self.element_uid.get()
    }

    fn size(&self) -> usize {
        self.live.get()
    }

    fn is_empty(&self) -> bool {
        self.live.get() == 0
    }

    fn add(&self) -> Option<Ref<dyn IObject>> {
        let factory = self.factory.borrow().clone()?;
        let slot_size = self.slot_size.get();

        let (page_ptr, slot_index) = {
            let mut pages = self.pages.borrow_mut();
            let found = pages
                .iter()
                .find(|page| page.free_head.get() != SENTINEL)
                .map(|page| &**page as *const HivePage as *mut HivePage);
            let page_ptr = match found {
                Some(page) => page,
                None => {
                    let capacity = next_page_capacity(pages.len());
                    trace!(capacity, "allocating hive page");
                    pages.push(HivePage::new(capacity, slot_size, self.slot_align.get()));
                    &mut **pages.last_mut().unwrap() as *mut HivePage
                }
            };
            let slot_index = unsafe { (*page_ptr).pop_free().expect("page has a free slot") };
            (page_ptr, slot_index)
        };

        unsafe {
            let page = &*page_ptr;
            page.state[slot_index].set(SlotState::Active);
            page.live_count.set(page.live_count.get() + 1);

            // The block is prepared before construction, so the object
            // is born with it; no post-construction swap.
            let hcb = Box::into_raw(Box::new(HiveControlBlock {
                ecb: ExternalControlBlock::new(destroy_normal),
                page: page_ptr,
                slot_index,
                slot_size,
                factory: factory.clone(),
            }));

            let slot = page.slot_ptr(slot_index);
            let Some(object) =
                factory.construct_in_place(slot, &mut (*hcb).ecb, ObjectFlags::HIVE_MANAGED)
            else {
                page.state[slot_index].set(SlotState::Free);
                page.push_free(slot_index);
                page.live_count.set(page.live_count.get() - 1);
                drop(Box::from_raw(hcb));
                return None;
            };

            (*hcb).ecb.block.set_external_tag();
            page.blocks[slot_index].set(hcb);
            page.objects[slot_index].set(Some(object));

            // `handle` adopts the construct-time strong count; the cast
            // adds the caller's. Dropping `handle` here leaves exactly
            // one count for `typed`, and the explicit bump below is the
            // hive's own, released by `remove`.
            let block = NonNull::new_unchecked(&mut (*hcb).ecb.block as *mut ControlBlock);
            let handle = Ref::adopt(object, block);
            let typed = handle.cast::<dyn IObject>()?;
            drop(handle);

            (*block.as_ptr()).add_strong();
            self.live.set(self.live.get() + 1);
            Some(typed)
        }
    }

    fn remove(&self, object: &dyn IObject) -> ReturnValue {
        let addr = object as *const dyn IObject as *const () as usize;
        let Some((page, slot_index)) = self.find_slot(addr) else {
            return ReturnValue::Fail;
        };
        unsafe {
            (*page).state[slot_index].set(SlotState::Zombie);
        }
        self.live.set(self.live.get() - 1);
        // Drop the hive's strong ref. When it was the last, the destroy
        // callback reclaims the slot right away.
        unsafe { release(object) };
        ReturnValue::Success
    }

    fn contains(&self, object: &dyn IObject) -> bool {
        let addr = object as *const dyn IObject as *const () as usize;
        self.find_slot(addr).is_some()
    }

    fn for_each(&self, visitor: &mut dyn FnMut(&dyn IObject) -> bool) {
        let pages = self.pages.borrow();
        for page in pages.iter() {
            for index in 0..page.capacity {
                if page.state[index].get() != SlotState::Active {
                    continue;
                }
                let Some(object) = page.objects[index].get() else {
                    continue;
                };
                let object = unsafe { object.as_ref() };
                let Some(object) = object.interface::<dyn IObject>() else {
                    continue;
                };
                if !visitor(object) {
                    return;
                }
            }
        }
    }
}

impl Drop for Hive {
    fn drop(&mut self) {
        let mut pages = std::mem::take(&mut *self.pages.borrow_mut());
        for page in pages.drain(..) {
            // Release the hive's strong ref on every active object;
            // unreferenced ones reclaim their slot immediately.
            for index in 0..page.capacity {
                if page.state[index].get() == SlotState::Active {
                    page.state[index].set(SlotState::Zombie);
                    if let Some(object) = page.objects[index].get() {
                        unsafe { release(object.as_ref()) };
                    }
                }
            }

            let has_zombies = (0..page.capacity).any(|i| page.state[i].get() == SlotState::Zombie);
            if has_zombies {
                // Externally referenced objects outlive the hive: hand
                // the page to the orphan path, which frees it together
                // with the last zombie.
                for index in 0..page.capacity {
                    if page.state[index].get() == SlotState::Zombie {
                        let hcb = page.blocks[index].get();
                        if !hcb.is_null() {
                            unsafe { (*hcb).ecb.destroy = destroy_orphan };
                        }
                    }
                }
                let _ = Box::into_raw(page);
            }
        }
    }
}

/// Registers the hive class with the calling thread's runtime root.
pub fn register_hive_type() -> ReturnValue {
    velk_core::instance().register_type::<Hive>()
}

/// Creates a hive bound to instances of `class_uid`.
pub fn create_hive(class_uid: Uid) -> Option<Ref<dyn IHive>> {
    let hive = velk_core::create_boxed::<Hive>().cast::<dyn IHive>()?;
    (hive.init(class_uid) == ReturnValue::Success).then_some(hive)
}
