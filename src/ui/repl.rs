use std::path::PathBuf;

use crossterm::style::Stylize;

use crate::api::client::FalconClient;
use crate::config::{generate_profile_id, AppConfig, Profile};
use crate::core::alert::AlertRecord;
use crate::core::filter::{AlertFilter, AlertStats};
use crate::core::output::OutputFormat;
use crate::core::store::{AlertStore, StoreStats};
use crate::core::time::{fmt_ts, now_utc, parse_iso_utc};
use crate::core::watch::{watch, WatchContext, WatchOptions};
use crate::ui::banner::mask_secret;
use crate::ui::read_line;
use crate::ui::selector::select_index;

const ROOT_HELP_DISCONNECTED: &str = "\
Commands:
  connect        authenticate with the active profile and start watching
  keys           manage API credential profiles
  recent         list recently cached alerts
  stats [date]   cache statistics, optionally for one day (YYYY-MM-DD)
  detail <id>    show a cached alert by its short id
  export <fmt>   export the cache to db.csv or db.json (fmt: csv|json)
  purge          delete all cached alerts
  help           show this help
  exit           quit";

const ROOT_HELP_CONNECTED: &str = "\
Commands:
  run            resume watching without re-authenticating
  config         session settings (polling, output, filter, logfile)
  keys           manage API credential profiles
  recent         list recently cached alerts
  stats [date]   cache statistics, optionally for one day (YYYY-MM-DD)
  detail <id>    show a cached alert by its short id
  export <fmt>   export the cache to db.csv or db.json (fmt: csv|json)
  purge          delete all cached alerts
  help           show this help
  exit           quit";

const KEYS_HELP: &str = "\
Commands:
  create         store a new credential profile
  list           show profiles and select the active one
  remove         delete a profile
  back           return to the root menu";

const CONFIG_HELP: &str = "\
Commands:
  polling        set the poll interval in seconds
  output         set the live output format (console/json/csv)
  filter         set the alert filter (severity, product, hostname, keywords)
  logfile        set or clear the live output log file
  back           return to the root menu";

pub struct ReplState {
    pub config: AppConfig,
    pub store: AlertStore,
    pub client: Option<FalconClient>,
    pub connected: bool,
    pub filter: AlertFilter,
    pub format: OutputFormat,
    pub log_file: Option<PathBuf>,
    pub stats: AlertStats,
}

pub struct Repl {
    pub s: ReplState,
}

impl Repl {
    pub fn new(config: AppConfig, store: AlertStore) -> Self {
        Self {
            s: ReplState {
                config,
                store,
                client: None,
                connected: false,
                filter: AlertFilter::default(),
                format: OutputFormat::Console,
                log_file: None,
                stats: AlertStats::default(),
            },
        }
    }

    pub async fn run(&mut self) {
        loop {
            let prompt = if self.s.connected {
                format!("{} ", "kestrel [connected] >".dark_yellow().bold())
            } else {
                format!("{} ", ">".bold())
            };
            let Some(line) = read_line(&prompt) else {
                println!();
                break;
            };
            let cmd = line.as_str();
            if cmd.is_empty() {
                continue;
            }

            match cmd {
                "exit" => break,
                "help" => {
                    println!();
                    if self.s.connected {
                        println!("{ROOT_HELP_CONNECTED}");
                    } else {
                        println!("{ROOT_HELP_DISCONNECTED}");
                    }
                    println!();
                }
                "connect" => self.cmd_connect().await,
                "run" => self.cmd_run().await,
                "keys" => self.keys_loop(),
                "config" => {
                    if self.s.connected {
                        self.config_loop();
                    } else {
                        println!("Unknown command. Type 'help'.");
                    }
                }
                "recent" => self.cmd_recent(),
                "stats" => self.cmd_stats(None),
                "purge" => self.cmd_purge(),
                _ => {
                    if let Some(date) = cmd.strip_prefix("stats ") {
                        self.cmd_stats(Some(date.trim()));
                    } else if let Some(id) = cmd.strip_prefix("detail ") {
                        self.cmd_detail(id.trim()).await;
                    } else if let Some(fmt) = cmd.strip_prefix("export ") {
                        self.cmd_export(fmt.trim());
                    } else {
                        println!("Unknown command. Type 'help'.");
                    }
                }
            }
        }
    }

    // ---------- connect / run / watch ----------

    async fn cmd_connect(&mut self) {
        let Some(profile) = self.s.config.active().cloned() else {
            println!("No active profile. Use 'keys' -> 'create' or 'list' to select one.");
            return;
        };

        let needs_client = match &self.s.client {
            Some(c) => !c.matches_profile(
                &profile.base_url,
                &profile.client_id,
                &profile.client_secret,
            ),
            None => true,
        };
        if needs_client {
            match FalconClient::new(
                &profile.base_url,
                &profile.client_id,
                &profile.client_secret,
            ) {
                Ok(client) => self.s.client = Some(client),
                Err(err) => {
                    println!("{}", format!("[!] {err}").red());
                    return;
                }
            }
            self.s.connected = false;
        }

        let Some(client) = self.s.client.as_mut() else {
            return;
        };

        let show_auth = !client.is_token_valid();
        if show_auth {
            println!("Authenticating…");
            if let Err(err) = client.ensure_token().await {
                tracing::debug!("token exchange failed: {err}");
                println!("{}", "Auth failure".red());
                self.s.connected = false;
                return;
            }
        }

        let was_connected = self.s.connected;
        self.s.connected = true;
        if !was_connected || show_auth {
            println!("{}", "kestrel [connected]".dark_yellow().bold());
        }

        self.watch_session().await;
    }

    async fn cmd_run(&mut self) {
        if !self.s.connected || self.s.client.is_none() {
            println!("Not connected. Use 'connect' first.");
            return;
        }
        self.watch_session().await;
    }

    async fn watch_session(&mut self) {
        let opts = WatchOptions {
            poll_interval: self.s.config.poll_interval,
            lookback_minutes: self.s.config.lookback_minutes,
            filter: self.s.filter.clone(),
            format: self.s.format,
            log_file: self.s.log_file.clone(),
        };
        let Some(client) = self.s.client.as_mut() else {
            return;
        };

        let mut ctx = WatchContext::start(opts.lookback_minutes);
        let since = parse_iso_utc(&ctx.since_iso).unwrap_or_else(now_utc);
        println!(
            "[+] Watching alerts since {} (poll {}s)…",
            fmt_ts(since),
            opts.poll_interval
        );
        println!(
            "{}",
            "(Press CTRL+C to stop watching and return to the menu)"
                .dark_yellow()
                .bold()
        );

        let result = watch(client, &self.s.store, &mut ctx, &opts, &mut self.s.stats).await;
        if let Err(err) = result {
            println!("{}", format!("[!] {err}").red());
            self.s.connected = false;
        }
        println!();
        println!(
            "{} ({} new alerts this session)",
            "Returned to root menu".cyan().bold(),
            ctx.new_count
        );
    }

    // ---------- keys submenu ----------

    fn keys_loop(&mut self) {
        loop {
            let Some(cmd) = read_line("keys> ") else {
                println!();
                break;
            };
            match cmd.as_str() {
                "" => continue,
                "back" => break,
                "help" => {
                    println!();
                    println!("{KEYS_HELP}");
                    println!();
                }
                "create" => self.keys_create(),
                "list" => self.keys_list(),
                "remove" => self.keys_remove(),
                _ => println!("Unknown command. Type 'help'."),
            }
        }
    }

    fn keys_create(&mut self) {
        let Some(client_id) = read_line("Enter Falcon ClientID: ") else {
            println!("\nCreate cancelled.");
            return;
        };
        let Some(secret) = read_line("Enter Secret: ") else {
            println!("\nCreate cancelled.");
            return;
        };
        let Some(base_url) = read_line("Enter Base URL: ") else {
            println!("\nCreate cancelled.");
            return;
        };

        if client_id.is_empty() || secret.is_empty() || base_url.is_empty() {
            println!("All fields are required.");
            return;
        }

        let created_at = now_utc();
        let id = generate_profile_id(&client_id, &base_url, &created_at);
        self.s.config.profiles.push(Profile {
            id: id.clone(),
            client_id,
            client_secret: secret,
            base_url,
            created_at,
        });
        println!(
            "{}",
            format!("Profile [{id}] has been created.").dark_yellow().bold()
        );

        // A new active profile invalidates the prior session.
        self.s.config.active_id = Some(id);
        self.s.client = None;
        self.s.connected = false;
    }

    fn keys_list(&mut self) {
        if self.s.config.profiles.is_empty() {
            println!("(no profiles)");
            return;
        }

        let options: Vec<String> = self
            .s
            .config
            .profiles
            .iter()
            .map(|p| format!("[{}]", p.id))
            .collect();
        let Some(idx) = select_index(&options, "Profile IDs") else {
            return;
        };

        let profile = &self.s.config.profiles[idx];
        println!(
            "{}",
            format!("Profile [{}] details:", profile.id).dark_yellow().bold()
        );
        println!("  client_id: {}", profile.client_id);
        println!("  client_secret: {}", mask_secret(&profile.client_secret));
        println!("  base_url: {}", profile.base_url);
        println!("  created_at: {}", fmt_ts(profile.created_at));

        let prev = self.s.config.active_id.clone();
        let selected = profile.id.clone();
        self.s.config.active_id = Some(selected.clone());
        if prev.as_deref() != Some(selected.as_str()) {
            self.s.client = None;
            self.s.connected = false;
        }
    }

    fn keys_remove(&mut self) {
        if self.s.config.profiles.is_empty() {
            println!("(no profiles)");
            return;
        }
        for (idx, profile) in self.s.config.profiles.iter().enumerate() {
            println!("{}. [{}]", idx + 1, profile.id);
        }
        let Some(sel) = read_line("Remove by number (Enter to cancel): ") else {
            println!();
            return;
        };
        if sel.is_empty() {
            return;
        }
        let Ok(choice) = sel.parse::<usize>() else {
            println!("Invalid selection.");
            return;
        };
        if choice < 1 || choice > self.s.config.profiles.len() {
            println!("Out of range.");
            return;
        }

        let removed = self.s.config.profiles.remove(choice - 1);
        println!("Removed profile [{}]", removed.id);
        if self.s.config.active_id.as_deref() == Some(removed.id.as_str()) {
            self.s.config.active_id = None;
            self.s.client = None;
            self.s.connected = false;
        }
    }

    // ---------- config submenu ----------

    fn config_loop(&mut self) {
        loop {
            let Some(cmd) = read_line("config> ") else {
                println!();
                break;
            };
            match cmd.as_str() {
                "" => continue,
                "back" => break,
                "help" => {
                    println!();
                    println!("{CONFIG_HELP}");
                    println!();
                }
                "polling" => self.config_polling(),
                "output" => self.config_output(),
                "filter" => self.config_filter(),
                "logfile" => self.config_logfile(),
                _ => println!("Unknown command. Type 'help'."),
            }
        }
    }

    fn config_polling(&mut self) {
        let Some(val) = read_line("Set polling frequency (seconds) [default: 15s]: ") else {
            println!();
            return;
        };
        if val.is_empty() {
            self.s.config.poll_interval = 15;
            println!("[+] polling interval set to 15s");
            return;
        }
        match val.parse::<u64>() {
            Ok(n) if n >= 1 => {
                self.s.config.poll_interval = n;
                println!("[+] polling interval set to {n}s");
            }
            Ok(_) => println!("Must be >= 1"),
            Err(_) => println!("Must be an integer"),
        }
    }

    fn config_output(&mut self) {
        let Some(fmt) = read_line("Output format [console/json/csv]: ") else {
            println!();
            return;
        };
        match OutputFormat::parse(&fmt) {
            Some(format) => {
                self.s.format = format;
                println!("[+] Output format set to {}", format.label());
            }
            None => println!("Invalid format"),
        }
    }

    fn config_filter(&mut self) {
        let mut filter = AlertFilter::default();

        if let Some(val) = read_line("Minimum severity (number, Enter for none): ") {
            if !val.is_empty() {
                match val.parse::<i64>() {
                    Ok(n) => filter.severity_min = Some(n),
                    Err(_) => {
                        println!("Must be an integer");
                        return;
                    }
                }
            }
        }
        if let Some(val) = read_line("Product contains (Enter for none): ") {
            if !val.is_empty() {
                filter.product = Some(val);
            }
        }
        if let Some(val) = read_line("Hostname contains (Enter for none): ") {
            if !val.is_empty() {
                filter.hostname = Some(val);
            }
        }
        if let Some(val) = read_line("Keywords, comma-separated (Enter for none): ") {
            filter.keywords = val
                .split(',')
                .map(str::trim)
                .filter(|kw| !kw.is_empty())
                .map(str::to_string)
                .collect();
        }

        if filter.is_empty() {
            println!("[+] filter cleared");
        } else {
            println!("[+] filter updated");
        }
        self.s.filter = filter;
    }

    fn config_logfile(&mut self) {
        let Some(val) = read_line("Log file path (Enter to disable): ") else {
            println!();
            return;
        };
        if val.is_empty() {
            self.s.log_file = None;
            println!("[+] live output logging disabled");
        } else {
            self.s.log_file = Some(PathBuf::from(val));
            println!("[+] live output logged to file");
        }
    }

    // ---------- cache commands ----------

    fn cmd_recent(&self) {
        match self.s.store.list_recent(20) {
            Ok(rows) if rows.is_empty() => println!("(no cached alerts)"),
            Ok(rows) => {
                for row in rows {
                    println!(
                        "[{}] sev={} status={} id={} host={} :: {}",
                        row.created_timestamp.as_deref().unwrap_or("-"),
                        row.severity,
                        row.status.as_deref().unwrap_or(""),
                        row.short_id.as_str().blue(),
                        row.hostname.as_deref().unwrap_or("-"),
                        row.name.as_deref().unwrap_or("Alert"),
                    );
                }
            }
            Err(err) => println!("{}", format!("[!] {err}").red()),
        }
    }

    fn cmd_stats(&self, date: Option<&str>) {
        let result = match date {
            Some(date) => self.s.store.daily_stats(date),
            None => self.s.store.stats(),
        };
        let stats = match result {
            Ok(stats) => stats,
            Err(err) => {
                println!("{}", format!("[!] {err}").red());
                return;
            }
        };
        print_store_stats(&stats);

        if date.is_none() {
            let session = &self.s.stats;
            println!(
                "Session since {}: {} alerts",
                fmt_ts(session.last_reset),
                session.total
            );
            for (sev, count) in &session.by_severity {
                println!("  sev {sev}: {count}");
            }
            for (prod, count) in &session.by_product {
                println!("  {prod}: {count}");
            }
            println!();
        }
    }

    async fn cmd_detail(&mut self, display_id: &str) {
        match self.s.store.get_by_display_id(display_id) {
            Ok(Some((alert, full_id))) => {
                print_detail(display_id, &alert, Some(&full_id));
                return;
            }
            Ok(None) => {}
            Err(err) => {
                println!("{}", format!("[!] {err}").red());
                return;
            }
        }

        // Not cached; fall back to a live fetch when a session exists.
        if let (true, Some(client)) = (self.s.connected, self.s.client.as_mut()) {
            match client.fetch_alerts(&[display_id.to_string()]).await {
                Ok(alerts) if !alerts.is_empty() => {
                    print_detail(display_id, &alerts[0], None);
                }
                Ok(_) => println!("Alert {display_id} not found"),
                Err(err) => println!("{}", format!("[!] {err}").red()),
            }
        } else {
            println!("Alert {display_id} not found in cache.");
        }
    }

    fn cmd_purge(&self) {
        let count = match self.s.store.stats() {
            Ok(stats) => stats.total,
            Err(err) => {
                println!("{}", format!("[!] {err}").red());
                return;
            }
        };
        if count == 0 {
            println!("(no cached alerts)");
            return;
        }
        let Some(confirm) = read_line(&format!("Delete all {count} cached alerts? [y/N]: "))
        else {
            println!();
            return;
        };
        if !confirm.eq_ignore_ascii_case("y") {
            println!("Purge cancelled.");
            return;
        }
        match self.s.store.purge() {
            Ok(deleted) => println!("Purged {deleted} alerts."),
            Err(err) => println!("{}", format!("[!] {err}").red()),
        }
    }

    fn cmd_export(&self, fmt: &str) {
        let result = match fmt.to_lowercase().as_str() {
            "csv" => self.s.store.export_csv("db.csv".as_ref()).map(|n| (n, "db.csv")),
            "json" => self
                .s
                .store
                .export_json("db.json".as_ref())
                .map(|n| (n, "db.json")),
            _ => {
                println!("Usage: export <csv|json>");
                return;
            }
        };
        match result {
            Ok((count, path)) => println!("Exported {count} alerts to {path}"),
            Err(err) => println!("{}", format!("[!] {err}").red()),
        }
    }
}

fn print_store_stats(stats: &StoreStats) {
    println!();
    match &stats.date {
        Some(date) => println!("Cache statistics for {date}:"),
        None => println!("Cache statistics:"),
    }
    println!("Total alerts: {}", stats.total);
    if !stats.by_severity.is_empty() {
        println!("By severity:");
        for (sev, count) in &stats.by_severity {
            println!("  {sev}: {count}");
        }
    }
    if !stats.by_product.is_empty() {
        println!("By product:");
        for (prod, count) in &stats.by_product {
            println!("  {prod}: {count}");
        }
    }
    println!();
}

fn print_detail(display_id: &str, alert: &AlertRecord, full_id: Option<&str>) {
    println!();
    println!("Alert details: {display_id}");
    println!("{}", "=".repeat(50));

    let severity = alert.severity_display();
    let fields = [
        ("Name", alert.name()),
        ("Description", alert.description()),
        (
            "Severity",
            if severity.is_empty() {
                None
            } else {
                Some(severity.as_str())
            },
        ),
        ("Status", alert.status()),
        ("Product", alert.product()),
        ("Created", alert.created_timestamp()),
        ("Updated", alert.updated_timestamp()),
        ("Hostname", alert.hostname()),
        ("Device ID", alert.device_id()),
        ("Full ID", full_id),
    ];
    for (label, value) in fields {
        if let Some(value) = value {
            println!("{label:12}: {value}");
        }
    }
    println!();
}
