// Copyright 2025 Simo Sorce
// See LICENSE.txt file for terms

use std::process::ExitCode;

use ckbridge::pkcs11::vendor::{vendor_code_to_name, CodeKind};
use ckbridge::pkcs11::CK_SLOT_ID;
use ckbridge::{Config, Module, ModuleIdentity, VendorCodeTable, VendorRules};
use clap::Parser;

/// Checks a vendor code file and shows the mappings it selects for a
/// module, either loaded from disk or described on the command line
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Arguments {
    /// The vendor code file to check
    #[arg(short = 'f', long)]
    file: String,

    /// Load this cryptoki module and match against its identity
    #[arg(short = 'm', long)]
    pkcs11_module: Option<String>,

    /// Also list the mechanisms of this slot, as generic codes
    #[arg(short = 's', long, requires = "pkcs11_module")]
    slot: Option<u64>,

    #[arg(long, conflicts_with = "pkcs11_module")]
    path: Option<String>,

    #[arg(long, conflicts_with = "pkcs11_module")]
    manufacturer: Option<String>,

    #[arg(long, conflicts_with = "pkcs11_module")]
    description: Option<String>,

    /// Library version, as MAJOR.MINOR
    #[arg(long, conflicts_with = "pkcs11_module")]
    lib_version: Option<String>,
}

fn parse_lib_version(s: &str) -> Result<(u8, u8), String> {
    let (major, minor) = match s.split_once('.') {
        Some(v) => v,
        None => (s, "0"),
    };
    let major = major
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("invalid major version '{}': {}", major, e))?;
    let minor = minor
        .trim()
        .parse::<u8>()
        .map_err(|e| format!("invalid minor version '{}': {}", minor, e))?;
    Ok((major, minor))
}

fn print_table(table: &VendorCodeTable) {
    for (kind, label) in [
        (CodeKind::KeyType, "key type"),
        (CodeKind::Mechanism, "mechanism"),
    ] {
        for (generic, vendor) in table.entries(kind) {
            let name = vendor_code_to_name(kind, generic).unwrap_or("?");
            println!("  {:<10} {:<32} -> 0x{:08x}", label, name, vendor);
        }
    }
}

fn check_module(
    path: &str,
    file: &str,
    slot: Option<u64>,
) -> Result<(), String> {
    let mut config = Config::new();
    config.vendor.file = Some(file.to_string());
    let module = Module::load(path, &config)
        .map_err(|e| format!("failed to load {}: {}", path, e))?;
    let info = module.info();
    println!(
        "Module: {} ({}) version {}.{}",
        info.manufacturer,
        info.description,
        info.library_version.0,
        info.library_version.1
    );
    match module.vendor_table() {
        Some(t) => {
            println!("Selected mappings:");
            print_table(t);
        }
        None => println!("No vendor code block matches this module"),
    }

    if let Some(slot) = slot {
        let slot = CK_SLOT_ID::try_from(slot).map_err(|e| e.to_string())?;
        let mechs = module
            .mechanism_list(slot)
            .map_err(|e| format!("failed to list mechanisms: {}", e))?;
        println!("Mechanisms of slot {}:", slot);
        for m in mechs {
            match vendor_code_to_name(CodeKind::Mechanism, m) {
                Some(name) => println!("  0x{:08x} {}", m, name),
                None => println!("  0x{:08x}", m),
            }
        }
    }
    Ok(())
}

fn run(args: Arguments) -> Result<(), String> {
    let rules = VendorRules::from_file(&args.file)
        .map_err(|e| format!("{}: {}", args.file, e))?;
    println!("{}: {} vendor code blocks", args.file, rules.len());

    if let Some(path) = &args.pkcs11_module {
        return check_module(path, &args.file, args.slot);
    }

    let version = match &args.lib_version {
        Some(v) => parse_lib_version(v)?,
        None => (0, 0),
    };
    let id = ModuleIdentity {
        path: args.path.unwrap_or_default(),
        manufacturer: args.manufacturer.unwrap_or_default(),
        description: args.description.unwrap_or_default(),
        version: version,
    };
    match rules.select(&id) {
        Some(t) => {
            println!("Selected mappings:");
            print_table(&t);
        }
        None => println!("No vendor code block matches"),
    }
    Ok(())
}

fn main() -> ExitCode {
    let args = Arguments::parse();
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        }
    }
}
