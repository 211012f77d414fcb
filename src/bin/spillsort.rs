use std::cmp::Ordering;
use std::error::Error;
use std::fs::File;
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, ValueEnum};
use tracing_subscriber::EnvFilter;

use spillsort::{
    NullValue, PersistedState, SortOptions, SortRecord, Sorter, make_sorter,
    make_sorter_from_existing_ranges,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum KeyType {
    /// Unsigned 64-bit integers, one per line
    U64,
    /// Raw lines compared bytewise
    Bytes,
}

#[derive(Parser, Debug)]
#[command(
    name = "spillsort",
    version,
    about = "Sort newline-delimited records with bounded memory"
)]
struct Args {
    /// Input file. Reads stdin if omitted.
    input: Option<PathBuf>,

    #[arg(long, value_enum, default_value_t = KeyType::Bytes)]
    key_type: KeyType,

    /// Sort in descending order
    #[arg(long)]
    descending: bool,

    /// Emit only the first N records (0 = all)
    #[arg(long, default_value_t = 0)]
    limit: u64,

    /// Memory budget before spilling, e.g. 65536, 512K, 64M
    #[arg(long = "max-memory", default_value = "64M", value_parser = parse_size)]
    max_memory: usize,

    /// Directory for spill files (defaults to the system temp dir)
    #[arg(long)]
    temp_dir: Option<PathBuf>,

    /// Fail instead of spilling when the budget is exceeded
    #[arg(long)]
    no_external: bool,

    /// Spill everything and write the resumable state here instead of output
    #[arg(long)]
    persist_to: Option<PathBuf>,

    /// Resume from a state written by --persist-to before reading input
    #[arg(long)]
    resume_from: Option<PathBuf>,

    /// Print sorter statistics to stderr
    #[arg(long)]
    stats: bool,
}

fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    let (digits, multiplier) = match s.chars().last().map(|c| c.to_ascii_uppercase()) {
        Some('K') => (&s[..s.len() - 1], 1024),
        Some('M') => (&s[..s.len() - 1], 1024 * 1024),
        Some('G') => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: usize = digits
        .parse()
        .map_err(|e| format!("invalid size '{s}': {e}"))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| format!("size '{s}' is too large"))
}

/// A key that can be read from and written back to one input line.
trait LineKey: SortRecord + Ord {
    fn parse_line(line: &[u8]) -> Result<Self, String>;
    fn write_line(&self, out: &mut dyn Write) -> io::Result<()>;
}

impl LineKey for u64 {
    fn parse_line(line: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(line).map_err(|e| e.to_string())?;
        text.trim()
            .parse()
            .map_err(|e| format!("'{}' is not an unsigned integer: {e}", text.trim()))
    }

    fn write_line(&self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "{self}")
    }
}

impl LineKey for Vec<u8> {
    fn parse_line(line: &[u8]) -> Result<Self, String> {
        Ok(line.to_vec())
    }

    fn write_line(&self, out: &mut dyn Write) -> io::Result<()> {
        out.write_all(self)?;
        out.write_all(b"\n")
    }
}

fn ascending<K: Ord>(a: (&K, &NullValue), b: (&K, &NullValue)) -> Ordering {
    a.0.cmp(b.0)
}

fn descending<K: Ord>(a: (&K, &NullValue), b: (&K, &NullValue)) -> Ordering {
    b.0.cmp(a.0)
}

fn open_input(path: Option<&PathBuf>) -> io::Result<Box<dyn BufRead>> {
    Ok(match path {
        Some(path) => Box::new(BufReader::new(File::open(path)?)),
        None => Box::new(BufReader::new(io::stdin())),
    })
}

fn run<K: LineKey>(args: &Args) -> Result<(), Box<dyn Error>> {
    if args.persist_to.is_some() && args.limit == 1 {
        return Err("--persist-to cannot be combined with --limit 1".into());
    }

    let temp_dir = args.temp_dir.clone().unwrap_or_else(std::env::temp_dir);
    let opts = SortOptions::new()
        .limit(args.limit)
        .max_memory_usage_bytes(args.max_memory)
        .ext_sort_allowed(!args.no_external)
        .temp_dir(temp_dir)
        .move_sorted_data_into_iterator(true);

    let comp: fn((&K, &NullValue), (&K, &NullValue)) -> Ordering = if args.descending {
        descending::<K>
    } else {
        ascending::<K>
    };

    let mut sorter: Box<dyn Sorter<K, NullValue>> = match &args.resume_from {
        Some(path) => {
            let state = PersistedState::from_json(&std::fs::read_to_string(path)?)?;
            tracing::info!(
                file = %state.file_name,
                ranges = state.ranges.len(),
                "resuming from persisted state"
            );
            make_sorter_from_existing_ranges(
                &state.file_name,
                &state.ranges,
                opts,
                comp,
                Default::default(),
            )?
        }
        None => make_sorter(opts, comp, Default::default())?,
    };

    let mut input = open_input(args.input.as_ref())?;
    let mut line = Vec::new();
    let mut line_no = 0u64;
    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        line_no += 1;
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        let key = K::parse_line(&line).map_err(|e| format!("line {line_no}: {e}"))?;
        sorter.emplace(key, NullValue)?;
    }
    tracing::info!(records = line_no, "finished reading input");

    if let Some(path) = &args.persist_to {
        let state = sorter.persist_data_for_shutdown()?;
        std::fs::write(path, state.to_json()?)?;
        tracing::info!(path = %path.display(), ranges = state.ranges.len(), "wrote resumable state");
    } else {
        let stdout = io::stdout();
        let mut out = BufWriter::new(stdout.lock());
        let mut iter = sorter.done()?;
        for record in iter.by_ref() {
            let (key, _) = record?;
            key.write_line(&mut out)?;
        }
        iter.close()?;
        out.flush()?;
    }

    if args.stats {
        eprint!("{}", sorter.stats());
    }
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let result = match args.key_type {
        KeyType::U64 => run::<u64>(&args),
        KeyType::Bytes => run::<Vec<u8>>(&args),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("spillsort: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("65536").unwrap(), 65536);
        assert_eq!(parse_size("512k").unwrap(), 512 * 1024);
        assert_eq!(parse_size("64M").unwrap(), 64 * 1024 * 1024);
        assert!(parse_size("lots").is_err());
    }

    #[test]
    fn test_line_keys() {
        assert_eq!(u64::parse_line(b" 42 ").unwrap(), 42);
        assert!(u64::parse_line(b"-1").is_err());
        assert_eq!(Vec::<u8>::parse_line(b"abc\r").unwrap(), b"abc\r");

        let mut out = Vec::new();
        7u64.write_line(&mut out).unwrap();
        b"xy".to_vec().write_line(&mut out).unwrap();
        assert_eq!(out, b"7\nxy\n");
    }
}
