//! # rmemalloc - A First-Fit Block-List Allocator
//!
//! This crate provides a general-purpose memory allocator that carves blocks
//! directly out of a contiguous heap whose end can be moved, the way `sbrk(2)`
//! moves the program break. It does not sit on top of any other allocator.
//!
//! ## Overview
//!
//! Every block ever carved from the heap stays on one address-ordered list:
//!
//! ```text
//!   Block List:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                         HEAP MEMORY                                  │
//!   │                                                                      │
//!   │   ┌──────┬──────┬────────────┬──────┬──────────┐                      │
//!   │   │  A   │  B   │     C      │  D   │    E     │                      │
//!   │   │ used │ free │    used    │ free │   used   │                      │
//!   │   └──────┴──────┴────────────┴──────┴──────────┘                      │
//!   │      ▲                                    ▲     ▲                    │
//!   │      │                                    │     │                    │
//!   │     head                                tail  Program                │
//!   │                                                Break                 │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   allocate: first free block big enough (B or D), else grow at the break.
//!   release:  E ends at the break, so it is handed back to the platform.
//!             Anything else is marked free and merged with free successors.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rmemalloc
//!   ├── align      - Word alignment macro (align!)
//!   ├── block      - Block header and debug snapshots
//!   ├── source     - Heap-extension primitives (Sbrk, Region)
//!   ├── arena      - The block list: first fit, growth, trimming, coalescing (internal)
//!   ├── allocator  - Allocator: one arena behind one lock
//!   ├── config     - Coalescing and trimming policies
//!   ├── error      - AllocError, ExtendError
//!   └── global     - Process-wide instance over the program break
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rmemalloc::{Allocator, Region};
//!
//! fn main() {
//!     let heap = Allocator::new(Region::new(1 << 20).unwrap());
//!
//!     let ptr = heap.allocate(64).unwrap();
//!     unsafe {
//!         ptr.as_ptr().write_bytes(0xAB, 64);
//!
//!         let ptr = heap.resize(Some(ptr), 256).unwrap();
//!         heap.release(Some(ptr));
//!     }
//!
//!     assert!(heap.is_empty());
//! }
//! ```
//!
//! ## How It Works
//!
//! Each block is a header immediately followed by its payload:
//!
//! ```text
//!   Single Allocation:
//!   ┌───────────────────────┬────────────────────────────────┐
//!   │    Block Header       │         User Data              │
//!   │  ┌─────────────────┐  │                                │
//!   │  │ size: N         │  │  ┌──────────────────────────┐  │
//!   │  │ is_free: false  │  │  │                          │  │
//!   │  │ next: None/blk  │  │  │     N bytes usable       │  │
//!   │  └─────────────────┘  │  │                          │  │
//!   │      HEADER_SIZE      │  └──────────────────────────┘  │
//!   └───────────────────────┴────────────────────────────────┘
//!                           ▲
//!                           └── Pointer returned to user
//! ```
//!
//! Going from a pointer back to its header is a fixed offset, so `release`
//! and `resize` never search for the block they were handed.
//!
//! Reused blocks are never split: a 16 byte block handed out for a 10 byte
//! request keeps its 16 bytes. Coalescing only looks forward by default, so
//! two free neighbours released lowest-first stay apart until something
//! below them is released (see [`CoalescePolicy`]).
//!
//! ## Concurrency
//!
//! One [`spin::Mutex`] per [`Allocator`] is held for the whole of every
//! operation, heap-source calls included. There is no per-thread cache.
//!
//! ## Safety
//!
//! Releasing or resizing a pointer that did not come from the same allocator
//! is undefined behaviour. [`Sbrk`] shares the program break with the rest of
//! the process; prefer a [`Region`] when something else may call `brk`.

pub mod align;
mod allocator;
mod arena;
mod block;
mod config;
mod error;
pub mod global;
mod source;

pub use allocator::Allocator;
pub use block::{BlockInfo, HEADER_ALIGN, HEADER_SIZE};
pub use config::{CoalescePolicy, Config, TrimPolicy};
pub use error::{AllocError, AllocResult, ExtendError};
pub use global::{GLOBAL, Global};
pub use source::{HeapSource, Region, Sbrk};
