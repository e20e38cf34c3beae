use anyhow::Context;
use areamap::commands::app_command::DEFAULT_SEARCH_LIMIT;
use areamap::commands::{AppCommand, USAGE};
use areamap::directory::{AreaNode, FULL_NAME_SEPARATOR};
use areamap::geocode::OpenCageGeocoder;
use areamap::{establish_connection, AppConfig, AreaDirectoryService, HierarchyImporter};
use chrono::Local;
use log::{info, warn};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_logging(AppConfig::log_dir_from_env().as_deref())?;
    let config = AppConfig::from_env();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = AppCommand::from_args(&args);
    if let AppCommand::Unknown(msg) = &command {
        if !msg.is_empty() {
            eprintln!("{msg}");
        }
        eprintln!("{USAGE}");
        std::process::exit(2);
    }
    if command == AppCommand::Help {
        println!("{USAGE}");
        return Ok(());
    }

    let db = Arc::new(
        establish_connection(&config.database_url)
            .await
            .with_context(|| format!("connecting to {}", config.database_url))?,
    );
    info!("database ready: {}", config.database_url);

    let mut directory = AreaDirectoryService::new(db.clone());
    if let Some(key) = config.opencage_api_key.clone() {
        match OpenCageGeocoder::new(key, config.opencage_base_url.clone()) {
            Ok(g) => directory = directory.with_geocoder(Arc::new(g)),
            Err(e) => warn!("geocoder disabled: {e}"),
        }
    }

    match command {
        AppCommand::Import { path, clear } => {
            let importer = HierarchyImporter::new(db.clone(), config.import_options(path, clear));
            let report = importer.run().await?;
            print!("{report}");
        }
        AppCommand::Locate { lat, lon } => {
            let found = directory.find_regions_containing(lat, lon).await?;
            if found.is_empty() {
                println!("no region contains ({lat}, {lon})");
            } else {
                let names: Vec<&str> = found.iter().map(|a| a.name.as_str()).collect();
                println!("{}", names.join(FULL_NAME_SEPARATOR));
                print_json(&directory.hierarchy_at(lat, lon).await?)?;
            }
        }
        AppCommand::Nearby {
            lat,
            lon,
            radius_km,
        } => {
            for n in directory.find_nearby(lat, lon, radius_km).await? {
                println!("{:>8.2} km  [{}] {} ({})", n.distance_km, n.area.id, n.area.name, n.area.kind);
            }
        }
        AppCommand::Area { id } => {
            let area = directory.get_region(id).await?;
            println!("{}", directory.full_name(id).await?);
            print_json(&area)?;
        }
        AppCommand::Children { id } => {
            for a in directory.list_children(id).await? {
                println!("[{}] {} ({})", a.id, a.name, a.kind);
            }
        }
        AppCommand::Ancestors { id } => {
            for a in directory.list_ancestors(id).await? {
                println!("[{}] {} (level {})", a.id, a.name, a.level);
            }
        }
        AppCommand::Tree { root } => {
            for node in directory.get_tree(root).await? {
                print_tree(&node, 0);
            }
        }
        AppCommand::Search { query } => {
            for a in directory.search(&query, DEFAULT_SEARCH_LIMIT).await? {
                println!("[{}] {} ({}, level {})", a.id, a.name, a.kind, a.level);
            }
        }
        AppCommand::Popular { limit } => {
            for p in directory.popular(limit).await? {
                println!("{:>6}  [{}] {}", p.venue_count, p.area.id, p.area.name);
            }
        }
        AppCommand::Export { level } => {
            let fc = directory.export_feature_collection(level).await?;
            println!("{}", serde_json::to_string(&fc)?);
        }
        AppCommand::AssignVenues => {
            print_json(&directory.bulk_assign_venues().await?)?;
        }
        AppCommand::Geocode { address } => match directory.detect_area_from_address(&address).await? {
            Some(area) => println!("{}", directory.full_name(area.id).await?),
            None => println!("no region found for {address}"),
        },
        AppCommand::Help | AppCommand::Unknown(_) => {}
    }

    Ok(())
}

fn init_logging(log_dir: Option<&Path>) -> anyhow::Result<()> {
    let mut builder = env_logger::Builder::from_default_env();
    builder
        .filter_level(log::LevelFilter::Warn)
        .filter_module("areamap", log::LevelFilter::Info)
        .filter_module("sqlx", log::LevelFilter::Error)
        .filter_module("sea_orm", log::LevelFilter::Error);

    if let Some(dir) = log_dir {
        let ts = Local::now().format("%Y%m%d-%H%M%S").to_string();
        std::fs::create_dir_all(dir)
            .with_context(|| format!("creating log dir {}", dir.display()))?;
        let log_file = std::fs::File::create(dir.join(format!("areamap-{ts}.log")))?;
        builder.target(env_logger::Target::Pipe(Box::new(log_file)));
    }
    builder.init();
    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_tree(node: &AreaNode, depth: usize) {
    println!(
        "{}[{}] {} ({})",
        "  ".repeat(depth),
        node.area.id,
        node.area.name,
        node.area.kind
    );
    for child in &node.children {
        print_tree(child, depth + 1);
    }
}
