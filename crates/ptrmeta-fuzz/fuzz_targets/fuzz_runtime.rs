#![no_main]
use libfuzzer_sys::fuzz_target;
use ptrmeta_membrane::{Metadata, Runtime, RuntimeConfig, SpatialTemporal};

fuzz_target!(|data: &[u8]| {
    let Ok(mut rt) = Runtime::<SpatialTemporal>::new(RuntimeConfig::compact()) else {
        return;
    };
    let mut live: Vec<(usize, Metadata)> = Vec::new();

    // Arbitrary operation streams must never panic; violations are plain errors.
    for chunk in data.chunks_exact(4) {
        let addr = 0x4000_0000 + usize::from(u16::from_le_bytes([chunk[2], chunk[3]])) * 8;
        match chunk[0] % 10 {
            0 => {
                if let Ok(meta) = rt.allocate_object(addr, usize::from(chunk[1]) + 1) {
                    live.push((addr, meta));
                }
            }
            1 => {
                if let Some((obj, meta)) = live.pop() {
                    let _ = rt.deallocate(obj, meta.key, meta.lock);
                }
            }
            2 => {
                let meta = live.last().map_or(Metadata::UNKNOWN, |(_, m)| *m);
                let _ = rt.metadata_store(addr, &meta);
            }
            3 => {
                let meta = rt.metadata_load(addr);
                let _ = rt.check_dereference(addr, usize::from(chunk[1]), &meta);
            }
            4 => {
                let _ = rt.copy_metadata(addr, 0x4000_0000, usize::from(chunk[1]) * 8);
            }
            5 => {
                let _ = rt.allocate_frame(usize::from(chunk[1] % 4));
            }
            6 => {
                let _ = rt.propagate_slot(usize::from(chunk[1] % 4), 0);
                let _ = rt.deallocate_frame();
            }
            7 => {
                if let Ok(proxy) = rt.allocate_va_arg_proxy(usize::from(chunk[1] % 4)) {
                    let _ = rt.proxy_metadata_store(addr, proxy);
                }
            }
            8 => {
                // Possibly stale or never opened.
                let proxy = rt.proxy_metadata_load(addr);
                let _ = rt.next_va_arg_metadata(proxy);
                if chunk[1] & 1 == 1 {
                    let _ = rt.free_va_arg_proxy(proxy);
                }
            }
            _ => {
                let _ = rt.check_temporal(u64::from(chunk[1]), addr);
            }
        }
    }
});
