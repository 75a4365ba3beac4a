extern crate chrono;
extern crate serde_json;
extern crate serde_yaml;
extern crate log;
extern crate log4rs;
extern crate ctrlc;
extern crate clap;

use std::sync::mpsc::{Sender, Receiver};
use std::sync::{mpsc, Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use serde::{Serialize, Deserialize};

use std::process::exit;

use chrono::SecondsFormat;
use clap::App;
use std::fs::File;
use std::io::{BufRead, Read, Write};
use std::path::{Path, PathBuf};

mod error;
mod export;
mod location;
mod record;
mod socket;
mod store;

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Configuration {
    socket_connection_parameters: socket::SocketParameters,
    export_parameters: export::ExportParameters,
}

/// Location provider backed by the remote event feed.
///
/// The feed is push-only, permission prompts and delivery control happen on
/// the remote device, so the control requests only announce what the daemon
/// is waiting for.
struct RemoteProvider;

impl location::LocationProvider for RemoteProvider {
    fn request_permission(&mut self) {
        log::info!(target: "lightlogd::loc", "Waiting for the remote provider to report an authorization decision!");
    }

    fn start_updates(&mut self) {
        log::info!(target: "lightlogd::loc", "Accepting location updates from the remote provider!");
    }

    fn stop_updates(&mut self) {
        log::info!(target: "lightlogd::loc", "No longer accepting location updates!");
    }
}

fn main() {
    let cli_yaml = clap::load_yaml!("cli.yml");
    let matches = App::from(cli_yaml).get_matches();
    let configuration_path = matches
        .value_of("config")
        .unwrap_or("resources/lightlogd.yml");

    match log4rs::init_file("resources/log.yml", Default::default()) {
        Ok(_) => {},
        Err(err) => {
            log::error!("Could not create logger from yaml configuration: {}", err);
            exit(-100);
        }
    };

    let mut configuration_file = match File::open(configuration_path) {
        Ok(file) => file,
        Err(err) => {
            log::error!(target: "lightlogd", "Cannot open the configuration file: \'{}\'", err);
            return;
        }
    };

    let mut configuration_string = String::new();
    match configuration_file.read_to_string(&mut configuration_string) {
        Ok(_) => {},
        Err(err) => {
            log::error!(target: "lightlogd", "Cannot read the configuration from file: \'{}\'", err);
            return;
        }
    };

    let configuration = match serde_yaml::from_str::<Configuration>(configuration_string.as_str()) {
        Ok(res) => res,
        Err(err) => {
            log::error!(target: "lightlogd", "Cannot deserialize the configuration: \'{}\'", err);
            return;
        }
    };

    let (tx, rx): (Sender<location::ProviderEvent>, Receiver<location::ProviderEvent>) = mpsc::channel();

    let terminate_programm = Arc::new(AtomicBool::new(false));
    let terminate_main_thread = Arc::clone(&terminate_programm);
    let terminate_socket_thread = Arc::clone(&terminate_programm);
    let terminate_location_thread = Arc::clone(&terminate_programm);

    let mut authority = location::LocationAuthority::new(Box::new(RemoteProvider));
    authority.subscribe(|state| {
        log::debug!(target: "lightlogd::loc", "State changed: authorization \'{:?}\' accuracy \'{:?}\' fix \'{}\'",
                    state.authorization,
                    state.accuracy,
                    state.sample
                        .map(|sample| format!("{:.6},{:.6}", sample.latitude, sample.longitude))
                        .unwrap_or_else(|| String::from("none")));
    });
    authority.start();
    let location_state = authority.shared_state();

    let socket_configuration = configuration.socket_connection_parameters.clone();
    let socket_thread = match thread::Builder::new()
        .name("socket".to_string())
        .spawn(move || {
            socket::socket_thread(tx, terminate_socket_thread, socket_configuration);
        }) {
        Ok(socket_handle) => socket_handle,
        Err(err) => {
            log::error!(target: "lightlogd", "Cannot start the udp socket thread: \'{}\'", err);
            exit(201);
        }
    };

    let location_thread = match thread::Builder::new()
        .name("location".to_string())
        .spawn(move || {
            location::authority_thread(rx, terminate_location_thread, authority);
        }) {
        Ok(location_handle) => location_handle,
        Err(err) => {
            log::error!(target: "lightlogd", "Cannot start the location thread: \'{}\'", err);
            exit(202);
        }
    };

    ctrlc::set_handler(move || {
        log::info!(target: "lightlogd","Termination signal received!");
        terminate_main_thread.store(true, Ordering::SeqCst);
    }).expect("Error setting Ctrl-C handler");

    let mut record_store = store::RecordStore::new();
    command_loop(
        &mut record_store,
        &location_state,
        &configuration.export_parameters,
        &terminate_programm,
    );
    terminate_programm.store(true, Ordering::SeqCst);

    match socket_thread.join() {
        Ok(_) => log::debug!(target: "lightlogd", "Joined socket thread!"),
        Err(_) => {
            log::error!(target: "lightlogd", "Could not join the socket thread!");
            exit(301);
        }
    };
    match location_thread.join() {
        Ok(_) => log::debug!(target: "lightlogd", "Joined location thread!"),
        Err(_) => {
            log::error!(target: "lightlogd", "Could not join the location thread!");
            exit(301);
        }
    };

    log::info!(target: "lightlogd", "Exiting");
    exit(0);
}

/// Reads commands from stdin until `quit`, end of input or termination.
///
/// Commands: `status`, `list`, `add <lx>`, `clear`,
/// `export <csv|geojson>`, `quit`.
fn command_loop(
    record_store: &mut store::RecordStore,
    location_state: &Arc<Mutex<location::LocationState>>,
    export_parameters: &export::ExportParameters,
    terminate: &Arc<AtomicBool>,
) {
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        if terminate.load(Ordering::SeqCst) {
            break;
        }
        let line = match line {
            Ok(line) => line,
            Err(err) => {
                log::error!(target: "lightlogd", "Cannot read command from stdin: \'{}\'", err);
                break;
            }
        };

        let mut parts = line.split_whitespace();
        match parts.next() {
            None => continue,
            Some("status") => print_status(record_store, location_state),
            Some("list") => print_records(record_store),
            Some("add") => handle_add(parts.next(), record_store, location_state),
            Some("clear") => {
                record_store.clear();
                println!("cleared all records");
            }
            Some("export") => handle_export(parts.next(), record_store, export_parameters),
            Some("quit") | Some("exit") => {
                terminate.store(true, Ordering::SeqCst);
                break;
            }
            Some(other) => {
                println!("unknown command \'{}\'", other);
                println!("available: status, list, add <lx>, clear, export <csv|geojson>, quit");
            }
        }
    }
}

fn print_status(
    record_store: &store::RecordStore,
    location_state: &Arc<Mutex<location::LocationState>>,
) {
    let state = match location_state.lock() {
        Ok(guard) => guard.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    };
    println!("authorization: {:?}", state.authorization);
    println!("accuracy:      {:?}", state.accuracy);
    match state.sample {
        Some(sample) => {
            println!("latitude:      {:.6}", sample.latitude);
            println!("longitude:     {:.6}", sample.longitude);
            println!("h_accuracy_m:  {:.2}", sample.horizontal_accuracy);
            println!(
                "fix time:      {}",
                sample
                    .fix_timestamp
                    .to_rfc3339_opts(SecondsFormat::Millis, true)
            );
        }
        None => println!("location:      no fix yet"),
    }
    if let Some(last_error) = state.last_error {
        println!("last error:    {}", last_error);
    }
    println!("records:       {}", record_store.len());
}

fn print_records(record_store: &store::RecordStore) {
    if record_store.is_empty() {
        println!("no records yet");
        return;
    }
    for record in record_store.records() {
        println!(
            "{:>4}  {:>12}  {:>12}  {:>10}  {}  {}",
            record.index,
            export::format_field(record.latitude),
            export::format_field(record.longitude),
            export::format_field(record.horizontal_accuracy),
            record.timestamp,
            export::format_field(record.brightness)
        );
    }
}

fn handle_add(
    argument: Option<&str>,
    record_store: &mut store::RecordStore,
    location_state: &Arc<Mutex<location::LocationState>>,
) {
    // Unparsable brightness never reaches the store.
    let brightness = match argument.map(str::parse::<f64>) {
        Some(Ok(value)) => value,
        _ => {
            println!(
                "{}",
                error::Error::InvalidInput(String::from("usage: add <brightness in lx>"))
            );
            return;
        }
    };

    let sample = match location_state.lock() {
        Ok(guard) => guard.sample,
        Err(poisoned) => poisoned.into_inner().sample,
    };
    match record_store.add(brightness, sample.as_ref()) {
        Ok(index) => println!("stored record {} with brightness {} lx", index, brightness),
        Err(err) => println!("{}", err),
    }
}

fn handle_export(
    format: Option<&str>,
    record_store: &store::RecordStore,
    export_parameters: &export::ExportParameters,
) {
    let snapshot = record_store.snapshot();
    let built = match format {
        Some("csv") => Ok(export::build_csv(&snapshot)),
        Some("geojson") => export::build_geojson(&snapshot),
        _ => {
            println!("usage: export <csv|geojson>");
            return;
        }
    };
    let (filename, bytes) = match built {
        Ok(pack) => pack,
        Err(err) => {
            log::error!(target: "lightlogd::export", "Export failed: \'{}\'", err);
            println!("{}", err);
            return;
        }
    };

    match write_export(&export_parameters.export_directory, &filename, &bytes) {
        Ok(path) => {
            log::info!(target: "lightlogd::export", "Wrote \'{}\' records to \'{}\'!", snapshot.len(), path.display());
            println!("wrote {} records to {}", snapshot.len(), path.display());
        }
        Err(err) => {
            log::error!(target: "lightlogd::export", "Cannot write export file: \'{}\'", err);
            println!("cannot write export file: {}", err);
        }
    };
}

fn write_export(directory: &str, filename: &str, bytes: &[u8]) -> Result<PathBuf, std::io::Error> {
    std::fs::create_dir_all(directory)?;
    let path = Path::new(directory).join(filename);
    let mut file = File::create(&path)?;
    file.write_all(bytes)?;
    Ok(path)
}
