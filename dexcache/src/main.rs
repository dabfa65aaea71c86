use std::{
    process,
    ptr::NonNull,
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread,
};

use clap::Parser as ClapParser;
use dexcache::{
    CallSite, CallSiteIndex, Class, ClassStatus, DexCache, DexCacheCreateInfo, DexFile,
    FieldIndex, FieldInfo, Marker, ObjectSpace, RememberedSet, SimpleRuntime, StringIndex,
    StringObject, TypeIndex, VisitRoots,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about = "Stress the dex cache under concurrent resolution and moving collections", long_about = None)]
struct Cli {
    #[arg(long, default_value_t = 4, help = "Mutator threads per round")]
    threads: usize,

    #[arg(long, default_value_t = 20_000, help = "Lookups per thread per round")]
    iterations: usize,

    #[arg(long, default_value_t = 3, help = "Rounds, each followed by a moving collection")]
    rounds: usize,

    #[arg(long, default_value_t = 4096, help = "String, type and field ids in the dex file")]
    ids: u32,

    #[arg(long, default_value_t = 256, help = "Call site ids in the dex file")]
    call_sites: u32,

    #[arg(long, help = "String cache capacity (power of two)")]
    string_cache_size: Option<usize>,

    #[arg(long, help = "Type cache capacity (power of two)")]
    type_cache_size: Option<usize>,

    #[arg(long, help = "Field cache capacity (power of two)")]
    field_cache_size: Option<usize>,

    #[arg(short, long, help = "Log at debug level unless RUST_LOG says otherwise")]
    verbose: bool,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicUsize,
    misses: AtomicUsize,
}

struct Workload {
    space: ObjectSpace,
    cache: DexCache,
    fields: Box<[FieldInfo]>,
    counters: Counters,
}

fn string_value(index: u32) -> String {
    format!("s{}", index)
}

fn descriptor(index: u32) -> String {
    format!("LT{};", index)
}

// xorshift, good enough to spread indices over the slots
fn next_index(state: &mut u64, bound: u32) -> u32 {
    *state ^= *state << 13;
    *state ^= *state >> 7;
    *state ^= *state << 17;
    (*state % bound as u64) as u32
}

impl Workload {
    fn hit(&self, hit: bool) {
        if hit {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn mutate(&self, seed: u64, iterations: usize) {
        let ids = self.cache.dex_file().num_string_ids;
        let call_sites = self.cache.dex_file().num_call_site_ids;
        let mut state = seed | 1;

        for _ in 0..iterations {
            let i = next_index(&mut state, ids);

            let string = self.cache.get_resolved_string(StringIndex(i));
            self.hit(string.is_some());
            if string.is_none() {
                let resolved = self.space.allocate(StringObject::new(&string_value(i)));
                self.cache.set_resolved_string(StringIndex(i), resolved);
            }

            let class = self.cache.get_resolved_type(TypeIndex(i));
            self.hit(class.is_some());
            if class.is_none() {
                let mut resolved = Class::new(&descriptor(i), 1);
                resolved.statics[0] = i as u64;
                let resolved = resolved.with_status(ClassStatus::Initialized);
                let resolved = self.space.allocate(resolved);
                self.cache.set_resolved_type(TypeIndex(i), resolved);
            }

            let field = self.cache.get_resolved_field(FieldIndex(i));
            self.hit(field.is_some());
            if field.is_none() {
                let info = NonNull::from(&self.fields[i as usize]);
                self.cache.set_resolved_field(FieldIndex(i), info);
            }

            if call_sites > 0 {
                let c = next_index(&mut state, call_sites);
                if self.cache.get_resolved_call_site(CallSiteIndex(c)).is_none() {
                    let candidate = self.space.allocate(CallSite::new(&format!("cs{}", c)));
                    self.cache.set_resolved_call_site(CallSiteIndex(c), candidate);
                }
            }
        }
    }

    /// Marks through the cache, frees everything else, moves the survivors
    /// and fixes the cache up. Mutators must be stopped.
    fn collect(&self) -> Result<(), String> {
        let mut marker = Marker::new();
        self.cache.visit_roots(&mut marker);
        let freed = self.space.sweep(&marker);

        let moved = self.space.evacuate_all();
        let mut forwarder = self.space.forwarder();
        self.cache.visit_roots(&mut forwarder);
        let forwarded = forwarder.forwarded();
        drop(forwarder);
        self.space.finish_collection();

        log::info!(
            "collection {}: freed {}, moved {}, rewrote {} roots",
            self.space.epoch(),
            freed,
            moved,
            forwarded
        );
        if forwarded != moved {
            return Err(format!("{} objects moved but {} roots rewritten", moved, forwarded));
        }
        Ok(())
    }

    fn verify(&self) -> Result<usize, String> {
        let dex = self.cache.dex_file();
        let mut checked = 0;
        for i in 0..dex.num_string_ids {
            if let Some(string) = self.cache.get_resolved_string(StringIndex(i)) {
                let object = self
                    .space
                    .resolve(string)
                    .ok_or_else(|| format!("string {} points at a dead object", i))?;
                if *object.value != *string_value(i) {
                    return Err(format!("string {} resolved to {:?}", i, object.value));
                }
                checked += 1;
            }
            if let Some(class) = self.cache.get_resolved_type(TypeIndex(i)) {
                let object = self
                    .space
                    .resolve(class)
                    .ok_or_else(|| format!("type {} points at a dead object", i))?;
                if !object.is_resolved() {
                    return Err(format!("type {} was published unresolved", i));
                }
                if *object.descriptor != *descriptor(i) || object.statics[0] != i as u64 {
                    return Err(format!("type {} resolved to {}", i, object.descriptor));
                }
                checked += 1;
            }
        }
        for c in 0..dex.num_call_site_ids {
            if let Some(site) = self.cache.get_resolved_call_site(CallSiteIndex(c)) {
                if self.space.resolve(site).is_none() {
                    return Err(format!("call site {} points at a dead object", c));
                }
                checked += 1;
            }
        }
        Ok(checked)
    }
}

fn run(cli: &Cli) -> Result<(), String> {
    let dex_file = DexFile::new("stress.dex")
        .with_strings(cli.ids)
        .with_types(cli.ids)
        .with_fields(cli.ids)
        .with_call_sites(cli.call_sites);
    let info = DexCacheCreateInfo {
        string_cache_size: cli.string_cache_size,
        type_cache_size: cli.type_cache_size,
        field_cache_size: cli.field_cache_size,
        ..Default::default()
    };

    let space = ObjectSpace::new();
    let location = space.allocate(StringObject::new(&dex_file.location));
    let barrier = Arc::new(RememberedSet::new());
    let cache = DexCache::new(
        Arc::new(dex_file),
        location,
        Arc::new(SimpleRuntime::default()),
        barrier.clone(),
        &info,
    )
    .map_err(|err| err.to_string())?;

    let fields = (0..cli.ids)
        .map(|i| FieldInfo::new(&format!("f{}", i), i * 4))
        .collect();
    let workload = Arc::new(Workload {
        space,
        cache,
        fields,
        counters: Counters::default(),
    });

    for round in 0..cli.rounds {
        let handles: Vec<_> = (0..cli.threads)
            .map(|t| {
                let workload = workload.clone();
                let seed = 0x9e37_79b9_7f4a_7c15u64 ^ ((round * cli.threads + t) as u64 + 1);
                let iterations = cli.iterations;
                thread::spawn(move || workload.mutate(seed, iterations))
            })
            .collect();
        for handle in handles {
            handle
                .join()
                .map_err(|_| "mutator thread panicked".to_string())?;
        }

        log::debug!(
            "round {}: {} objects live, {} caches remembered",
            round,
            workload.space.len(),
            barrier.take().len()
        );
        workload.collect()?;
        let checked = workload.verify()?;
        log::info!("round {}: verified {} cached entries", round, checked);
    }

    let hits = workload.counters.hits.load(Ordering::Relaxed);
    let misses = workload.counters.misses.load(Ordering::Relaxed);
    log::info!(
        "{} lookups, {} hits, {} misses ({:.1}% hit rate)",
        hits + misses,
        hits,
        misses,
        100.0 * hits as f64 / (hits + misses).max(1) as f64
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    if cli.ids == 0 {
        log::error!("--ids must be at least 1");
        process::exit(2);
    }

    if let Err(err) = run(&cli) {
        log::error!("{}", err);
        process::exit(1);
    }
}
