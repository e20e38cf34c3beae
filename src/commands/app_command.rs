use std::path::PathBuf;
use std::str::FromStr;

pub const DEFAULT_NEARBY_RADIUS_KM: f64 = 5.0;
pub const DEFAULT_POPULAR_LIMIT: usize = 10;
pub const DEFAULT_SEARCH_LIMIT: u64 = 20;

#[derive(Debug, Clone, PartialEq)]
pub enum AppCommand {
    Import {
        path: Option<PathBuf>,
        clear: bool,
    },
    Locate {
        lat: f64,
        lon: f64,
    },
    Nearby {
        lat: f64,
        lon: f64,
        radius_km: f64,
    },
    Area {
        id: i32,
    },
    Children {
        id: i32,
    },
    Ancestors {
        id: i32,
    },
    Tree {
        root: Option<i32>,
    },
    Search {
        query: String,
    },
    Popular {
        limit: usize,
    },
    Export {
        level: Option<i32>,
    },
    AssignVenues,
    Geocode {
        address: String,
    },
    Help,
    /// Carries the usage line to show.
    Unknown(String),
}

pub const USAGE: &str = "\
usage: areamap <command>
  import [path] [--clear]        import boundary shapes
  locate <lat> <lon>             regions containing a point
  nearby <lat> <lon> [radius_km] regions within a radius (default 5 km)
  area <id>                      one region with its full name
  children <id>                  active child regions
  ancestors <id>                 parent chain, root first
  tree [root_id]                 nested hierarchy
  search <query>                 regions by name
  popular [n]                    regions with the most venues
  export [level]                 GeoJSON FeatureCollection
  assign-venues                  attach unassigned venues to regions
  geocode <address...>           detect the region of an address
  help";

impl FromStr for AppCommand {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split_whitespace().collect();
        Ok(AppCommand::from_args(&parts))
    }
}

impl AppCommand {
    /// Parses already-split arguments, so one argument may hold spaces
    /// (a quoted path on the command line).
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> AppCommand {
        let parts: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        let Some(&head) = parts.first() else {
            return AppCommand::Unknown("".to_string());
        };
        let rest = &parts[1..];

        match head {
            "import" => {
                let clear = rest.contains(&"--clear");
                let path = rest
                    .iter()
                    .find(|p| !p.starts_with("--"))
                    .map(PathBuf::from);
                AppCommand::Import { path, clear }
            }
            "locate" => match parse_point(rest) {
                Some((lat, lon)) => AppCommand::Locate { lat, lon },
                None => AppCommand::Unknown("usage: locate <lat> <lon>".to_string()),
            },
            "nearby" => {
                let usage =
                    || AppCommand::Unknown("usage: nearby <lat> <lon> [radius_km]".to_string());
                let Some((lat, lon)) = parse_point(rest) else {
                    return usage();
                };
                let radius_km = match rest.get(2) {
                    Some(r) => match r.parse::<f64>() {
                        Ok(v) => v,
                        Err(_) => return usage(),
                    },
                    None => DEFAULT_NEARBY_RADIUS_KM,
                };
                AppCommand::Nearby {
                    lat,
                    lon,
                    radius_km,
                }
            }
            "area" | "children" | "ancestors" => {
                let Some(id) = rest.first().and_then(|s| s.parse::<i32>().ok()) else {
                    return AppCommand::Unknown(format!("usage: {head} <id>"));
                };
                match head {
                    "area" => AppCommand::Area { id },
                    "children" => AppCommand::Children { id },
                    _ => AppCommand::Ancestors { id },
                }
            }
            "tree" => match rest.first() {
                None => AppCommand::Tree { root: None },
                Some(s) => match s.parse::<i32>() {
                    Ok(id) => AppCommand::Tree { root: Some(id) },
                    Err(_) => AppCommand::Unknown("usage: tree [root_id]".to_string()),
                },
            },
            "search" => {
                let query = rest.join(" ");
                if query.trim().is_empty() {
                    AppCommand::Unknown("usage: search <query>".to_string())
                } else {
                    AppCommand::Search { query }
                }
            }
            "popular" => {
                let limit = rest
                    .first()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(DEFAULT_POPULAR_LIMIT);
                AppCommand::Popular { limit }
            }
            "export" => match rest.first() {
                None => AppCommand::Export { level: None },
                Some(s) => match s.parse::<i32>() {
                    Ok(level) => AppCommand::Export { level: Some(level) },
                    Err(_) => AppCommand::Unknown("usage: export [level]".to_string()),
                },
            },
            "assign-venues" => AppCommand::AssignVenues,
            "geocode" => {
                let address = rest.join(" ");
                if address.trim().is_empty() {
                    AppCommand::Unknown("usage: geocode <address>".to_string())
                } else {
                    AppCommand::Geocode { address }
                }
            }
            "help" | "-h" | "--help" => AppCommand::Help,
            other => AppCommand::Unknown(format!("unknown command: {other}")),
        }
    }
}

fn parse_point(args: &[&str]) -> Option<(f64, f64)> {
    let lat = args.first()?.parse::<f64>().ok()?;
    let lon = args.get(1)?.parse::<f64>().ok()?;
    Some((lat, lon))
}
