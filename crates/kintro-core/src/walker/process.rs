//! Active-process list walk

use std::cell::Cell;
use std::ops::ControlFlow;

use tracing::debug;

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::kernel::{KernelContext, ProcessRecord};
use crate::layout::process::{IMAGE_NAME_LEN, SYSTEM_PID};
use crate::memory::bytes::until_nul;
use crate::memory::{Access, PhysicalMemory};
use crate::translate::AddressTranslator;
use crate::walker::list::CircularList;

/// Compare a process image name against a wanted name the way the kernel
/// stores it: at most 15 bytes, ASCII case-insensitive.
pub fn image_name_matches(image_name: &str, wanted: &str) -> bool {
    let wanted = &wanted.as_bytes()[..wanted.len().min(IMAGE_NAME_LEN)];
    let image_name = &image_name.as_bytes()[..image_name.len().min(IMAGE_NAME_LEN)];
    image_name.eq_ignore_ascii_case(wanted)
}

pub struct ProcessWalker<'a, P: ?Sized> {
    translator: AddressTranslator<'a, P>,
    config: &'a EngineConfig,
}

impl<'a, P: PhysicalMemory + ?Sized> ProcessWalker<'a, P> {
    pub fn new(translator: AddressTranslator<'a, P>, config: &'a EngineConfig) -> Self {
        Self { translator, config }
    }

    /// Read one process object; unreadable fields stay zero.
    ///
    /// Returns the record and whether the object is a live process.
    fn read_record(&self, ctx: &KernelContext, va: u64, pa: u64) -> (ProcessRecord, bool) {
        let guard = self.translator.guard();
        let o = &ctx.offsets;
        let field_u64 = |offset: u64| {
            if offset == 0 {
                return 0;
            }
            guard
                .read_u64(pa.wrapping_add(offset), Access::Checked)
                .unwrap_or(0)
        };

        let stack_count = if o.stack_count == 0 {
            None
        } else {
            Some(
                guard
                    .read_u32(pa.wrapping_add(o.stack_count), Access::Checked)
                    .unwrap_or(0),
            )
        };

        let name = guard
            .read_bytes(
                pa.wrapping_add(o.image_file_name),
                IMAGE_NAME_LEN,
                Access::Checked,
            )
            .map(|bytes| String::from_utf8_lossy(until_nul(&bytes)).into_owned())
            .unwrap_or_default();

        let record = ProcessRecord {
            virtual_address: va,
            physical_address: pa,
            page_table_root: field_u64(o.dir_base),
            pid: field_u64(o.pid()),
            virtual_size: field_u64(o.virtual_size),
            vad_root: field_u64(o.vad_root),
            name,
        };
        let live = stack_count.is_none_or(|count| count != 0) || record.pid == SYSTEM_PID;
        (record, live)
    }

    /// Visit every live process once, starting at the initial process.
    ///
    /// Each node is translated through the page-table root of the node
    /// before it. Returns `AnchorProcessMissing` when the walk ends without
    /// having seen pid 4 and `visit` never broke out.
    pub fn walk<B>(
        &self,
        ctx: &KernelContext,
        mut visit: impl FnMut(&ProcessRecord) -> ControlFlow<B>,
    ) -> Result<Option<B>> {
        let apl = ctx.offsets.apl;
        let root = Cell::new(ctx.page_table_root);
        let translator = self.translator;

        let list = CircularList::new(
            ctx.initial_process.virtual_address,
            apl,
            self.config.process_walk_limit,
            |link| translator.read_virtual_u64(link, root.get()).ok(),
        );

        let mut seen_anchor = false;
        let mut visited = 0usize;
        for va in list {
            let Some(pa) = translator.translate(va, root.get()) else {
                debug!("Process node 0x{:X} does not translate", va);
                break;
            };
            visited += 1;

            let (record, live) = self.read_record(ctx, va, pa);
            if record.page_table_root != 0 {
                root.set(record.page_table_root);
            }
            if record.pid == SYSTEM_PID {
                seen_anchor = true;
            }
            if !live {
                continue;
            }
            if let ControlFlow::Break(value) = visit(&record) {
                return Ok(Some(value));
            }
        }

        debug!("Process walk visited {} nodes", visited);
        if !seen_anchor {
            return Err(Error::AnchorProcessMissing);
        }
        Ok(None)
    }

    pub fn dump_process(&self, ctx: &KernelContext, name: &str) -> Result<ProcessRecord> {
        let found = self.walk(ctx, |record| {
            if image_name_matches(&record.name, name) {
                ControlFlow::Break(record.clone())
            } else {
                ControlFlow::Continue(())
            }
        })?;

        match found {
            Some(record) => {
                debug!(
                    "Process {} (pid {}): root 0x{:X}",
                    record.name, record.pid, record.page_table_root
                );
                Ok(record)
            }
            None => Err(Error::ProcessNotFound(name.to_string())),
        }
    }

    /// Page-table root of the process named `name`
    pub fn find_process(&self, ctx: &KernelContext, name: &str) -> Result<u64> {
        self.dump_process(ctx, name)
            .map(|record| record.page_table_root)
    }

    pub fn list_processes(&self, ctx: &KernelContext) -> Result<Vec<ProcessRecord>> {
        let mut processes = Vec::new();
        self.walk::<()>(ctx, |record| {
            processes.push(record.clone());
            ControlFlow::Continue(())
        })?;
        Ok(processes)
    }
}
