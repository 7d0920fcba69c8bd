//! robofw - Robot firewall manager
//!
//! Command-line front end for the Robot firewall of dedicated servers.
//!
//! # Usage
//!
//! ```bash
//! robofw allow-ssh 123456                    # SSH from your current public IP
//! robofw allow-https 123456                  # HTTPS from anywhere
//! robofw allow-mosh 123456 --ip 198.51.100.0/24
//! robofw rules list 123456
//! robofw plan 123456 firewall.json           # Preview a declarative file
//! robofw apply 123456 firewall.json          # Replace the rule set
//! robofw template create --from-server 123456 --name baseline
//! ```
//!
//! Ctrl-C abandons the running operation. A write that already reached the
//! provider is not rolled back.

use clap::{Args, Parser, Subcommand};
use robofw::audit::{self, EventType};
use robofw::config::{self, AppConfig};
use robofw::core::declarative::{self, FirewallDocument, Plan};
use robofw::core::firewall::{PortSpec, TemplateDraft};
use robofw::core::reconciler::ReconcileReport;
use robofw::core::templates;
use robofw::display;
use robofw::robot::RobotClient;
use robofw::{
    Action, DesiredFirewall, Direction, Error, IpVersion, Protocol, Reconciler, Result, Rule,
    RuleSelector, Sources,
};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

shadow_rs::shadow!(build);

/// Exit status after Ctrl-C, as shells report SIGINT.
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser)]
#[command(name = "robofw", version, long_version = build::CLAP_LONG_VERSION)]
#[command(about = "Manage the Robot firewall of dedicated servers", long_about = None)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace); RUST_LOG overrides
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Print JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Do not ask before replacing or deleting
    #[arg(short, long, global = true)]
    yes: bool,

    /// Config file to use instead of the default location
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Allow SSH (tcp/22); without --ip, from your current public IP
    AllowSsh(SourceArgs),
    /// Allow HTTPS (tcp/443); without --ip, from anywhere
    AllowHttps(SourceArgs),
    /// Allow MOSH (SSH, udp/60000-61000 and established TCP); without --ip, from your public IP
    AllowMosh(SourceArgs),
    /// Discard inbound HTTP (tcp/80) over IPv4 and IPv6
    BlockHttp {
        #[arg(value_parser = robofw::validators::validate_server_id)]
        server: String,
    },
    /// Inspect and edit individual rules
    #[command(subcommand)]
    Rules(RulesCommand),
    /// Show what applying a declarative file would change
    Plan {
        #[arg(value_parser = robofw::validators::validate_server_id)]
        server: String,
        file: PathBuf,
    },
    /// Replace the firewall with the state described in a declarative file
    Apply {
        #[arg(value_parser = robofw::validators::validate_server_id)]
        server: String,
        file: PathBuf,
    },
    /// Wait until the firewall has finished applying a change
    Wait {
        #[arg(value_parser = robofw::validators::validate_server_id)]
        server: String,
    },
    /// Remove every user rule and disable the firewall
    Reset {
        #[arg(value_parser = robofw::validators::validate_server_id)]
        server: String,
    },
    /// Manage firewall templates
    #[command(subcommand)]
    Template(TemplateCommand),
    /// Show or change the local configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args)]
struct SourceArgs {
    #[arg(value_parser = robofw::validators::validate_server_id)]
    server: String,

    /// Source address or CIDR (repeatable)
    #[arg(long = "ip", value_name = "IP/CIDR")]
    ips: Vec<String>,
}

#[derive(Subcommand)]
enum RulesCommand {
    /// List the live rules, provider rules included
    List {
        #[arg(value_parser = robofw::validators::validate_server_id)]
        server: String,
        /// Only show one direction
        #[arg(short, long)]
        direction: Option<Direction>,
    },
    /// Add a rule, expanded once per source/destination address
    ///
    /// Several addresses yield rules named "NAME #1", "NAME #2", ... Existing
    /// rules match by name, so reusing a name for other addresses adds
    /// nothing; pick a new name for a second batch.
    Add(AddRuleArgs),
    /// Delete one user rule by name or position
    Delete {
        #[arg(value_parser = robofw::validators::validate_server_id)]
        server: String,
        #[arg(short, long, default_value_t = Direction::Input)]
        direction: Direction,
        #[arg(long, conflicts_with = "index", required_unless_present = "index")]
        name: Option<String>,
        /// Position as shown by 'rules list'
        #[arg(long)]
        index: Option<usize>,
    },
}

#[derive(Args)]
struct AddRuleArgs {
    #[arg(value_parser = robofw::validators::validate_server_id)]
    server: String,
    #[arg(long, value_parser = robofw::validators::validate_rule_name)]
    name: String,
    #[arg(short, long, default_value_t = Direction::Input)]
    direction: Direction,
    #[arg(long, default_value_t = Action::Accept)]
    action: Action,
    #[arg(long)]
    protocol: Option<Protocol>,
    /// Inferred from the addresses when omitted
    #[arg(long)]
    ip_version: Option<IpVersion>,
    /// Source address or CIDR (repeatable)
    #[arg(long = "src", value_name = "IP/CIDR")]
    sources: Vec<String>,
    /// Destination address or CIDR (repeatable)
    #[arg(long = "dst", value_name = "IP/CIDR")]
    destinations: Vec<String>,
    /// Port or range, e.g. 1024-65535
    #[arg(long)]
    src_port: Option<PortSpec>,
    /// Port or range, e.g. 22 or 60000-61000
    #[arg(long)]
    dst_port: Option<PortSpec>,
    /// TCP flag expression, e.g. ack or syn|fin
    #[arg(long, value_parser = robofw::validators::validate_tcp_flags)]
    tcp_flags: Option<String>,
}

impl AddRuleArgs {
    fn template(&self) -> Rule {
        Rule {
            ip_version: self.ip_version,
            protocol: self.protocol,
            source_port: self.src_port.clone(),
            dest_port: self.dst_port.clone(),
            tcp_flags: self.tcp_flags.clone(),
            ..Rule::new(self.name.clone(), self.action)
        }
    }
}

#[derive(Subcommand)]
enum TemplateCommand {
    /// List templates
    List,
    /// Show a template with its rules
    Show { id: u32 },
    /// Create a template from a server, a JSON file, or from scratch
    Create {
        #[arg(long, value_parser = robofw::validators::validate_template_name)]
        name: Option<String>,
        /// Copy the user rules of this server
        #[arg(long, conflicts_with = "file", value_parser = robofw::validators::validate_server_id)]
        from_server: Option<String>,
        /// Template JSON file
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Replace a template with the contents of a JSON file
    Update {
        id: u32,
        #[arg(long)]
        file: PathBuf,
    },
    /// Apply a template to a server
    Apply {
        id: u32,
        #[arg(value_parser = robofw::validators::validate_server_id)]
        server: String,
    },
    /// Delete a template
    Delete { id: u32 },
    /// Write a template to a JSON file
    Export { id: u32, file: PathBuf },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the effective configuration (password masked)
    Show,
    /// Store web service credentials in the config file
    SetCredentials {
        #[arg(long)]
        user: String,
        /// Prompted for when omitted
        #[arg(long)]
        password: Option<String>,
        #[arg(long)]
        base_url: Option<String>,
    },
}

/// How results are printed and whether prompts are skipped.
struct Output {
    json: bool,
    yes: bool,
}

impl Output {
    fn print<T: Serialize>(&self, text: impl FnOnce() -> String, value: &T) -> Result<()> {
        if self.json {
            println!("{}", serde_json::to_string_pretty(value)?);
        } else {
            print!("{}", text());
        }
        Ok(())
    }

    fn report(&self, server: &str, report: &ReconcileReport) -> Result<()> {
        self.print(|| display::report_summary(server, report), report)
    }

    /// Asks before a destructive step; `false` means the user declined.
    fn confirm(&self, question: &str) -> Result<bool> {
        if self.yes {
            return Ok(true);
        }
        if !stdin_is_tty() {
            return Err(Error::validation(
                "--yes",
                "confirmation needed but stdin is not a terminal",
            ));
        }
        ask_yes_no(question)
    }
}

fn stdin_is_tty() -> bool {
    nix::unistd::isatty(std::io::stdin()).unwrap_or(false)
}

fn ask_yes_no(question: &str) -> Result<bool> {
    use crossterm::event::{self, Event, KeyCode, KeyEventKind};

    print!("{question} [y/N] ");
    std::io::stdout().flush()?;

    crossterm::terminal::enable_raw_mode()?;
    let answer = loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => {
                break Ok(matches!(key.code, KeyCode::Char('y' | 'Y')));
            }
            Ok(_) => {}
            Err(e) => break Err(e),
        }
    };
    // Always restore terminal to normal mode
    let _ = crossterm::terminal::disable_raw_mode();
    println!();
    Ok(answer?)
}

/// Reads a password without echo; falls back to one line of stdin when piped.
fn read_secret(prompt: &str) -> Result<String> {
    use crossterm::event::{self, Event, KeyCode, KeyEventKind, KeyModifiers};

    if !stdin_is_tty() {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line)?;
        return Ok(line.trim_end_matches(['\r', '\n']).to_string());
    }

    print!("{prompt}");
    std::io::stdout().flush()?;

    crossterm::terminal::enable_raw_mode()?;
    let mut secret = String::new();
    let result = loop {
        match event::read() {
            Ok(Event::Key(key)) if key.kind == KeyEventKind::Press => match key.code {
                KeyCode::Enter => break Ok(()),
                KeyCode::Esc => {
                    break Err(std::io::Error::new(
                        std::io::ErrorKind::Interrupted,
                        "password entry cancelled",
                    ));
                }
                KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                    break Err(std::io::Error::new(
                        std::io::ErrorKind::Interrupted,
                        "password entry cancelled",
                    ));
                }
                KeyCode::Backspace => {
                    secret.pop();
                }
                KeyCode::Char(c) => secret.push(c),
                _ => {}
            },
            Ok(_) => {}
            Err(e) => break Err(e),
        }
    };
    let _ = crossterm::terminal::disable_raw_mode();
    println!();
    result?;
    Ok(secret)
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("robofw={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let _ = robofw::utils::ensure_dirs();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to start async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    let json = cli.json;
    runtime.block_on(async move {
        tokio::select! {
            result = run(cli) => match result {
                Ok(()) => ExitCode::SUCCESS,
                Err(e) => {
                    print_error(&e, json);
                    ExitCode::FAILURE
                }
            },
            Ok(()) = tokio::signal::ctrl_c() => {
                eprintln!();
                eprintln!("Interrupted. A change already sent may still be applied; check with 'robofw rules list'.");
                ExitCode::from(EXIT_INTERRUPTED)
            }
        }
    })
}

fn print_error(err: &Error, json: bool) {
    if json {
        let translation = err.translate();
        let value = serde_json::json!({
            "error": err.kind(),
            "message": err.to_string(),
            "hint": translation.user_message,
            "suggestions": translation.suggestions,
            "retryable": err.is_retryable(),
        });
        println!("{value:#}");
    } else {
        eprint!("{}", display::error_report(err));
    }
}

async fn run(cli: Cli) -> Result<()> {
    let output = Output {
        json: cli.json,
        yes: cli.yes,
    };
    let config = config::load_config(cli.config.as_deref()).await?;

    match cli.command {
        Commands::Config(command) => {
            config_command(command, cli.config.as_deref(), &config, &output).await
        }
        Commands::Template(command) => {
            template_command(command, &connect(&config)?, &output).await
        }
        Commands::Rules(command) => rules_command(command, &connect(&config)?, &output).await,
        command => firewall_command(command, &connect(&config)?, &output).await,
    }
}

fn connect(config: &AppConfig) -> Result<Reconciler<RobotClient>> {
    let credentials = config.credentials()?;
    let client = RobotClient::with_base_url(
        credentials.username,
        credentials.password,
        config.base_url.clone(),
        config.request_timeout(),
    )
    .map_err(|e| Error::Transport(e.to_string()))?;
    Ok(Reconciler::new(client)
        .with_waiter(config.waiter())
        .with_max_rules(config.max_rules_per_direction)
        .with_ip_resolver(config.ip_resolver()?))
}

fn sources(ips: Vec<String>, default: Sources) -> Sources {
    if ips.is_empty() {
        default
    } else {
        Sources::Explicit(ips)
    }
}

fn error_text<T>(result: &Result<T>) -> Option<String> {
    result.as_ref().err().map(ToString::to_string)
}

async fn audit_report(event: EventType, server: &str, result: &Result<ReconcileReport>) {
    let details = result
        .as_ref()
        .map_or_else(|_| serde_json::json!({}), audit::report_details);
    audit::log_operation(event, Some(server), details, error_text(result)).await;
}

/// Desired state of a declarative file, with a referenced template resolved
/// so it can be diffed.
async fn load_desired(
    rec: &Reconciler<RobotClient>,
    file: &Path,
) -> Result<(DesiredFirewall, DesiredFirewall)> {
    let desired = FirewallDocument::load(file).await?.to_desired()?;
    let comparable = match desired.template_id {
        Some(id) => DesiredFirewall::from_template(&rec.get_template(id).await?),
        None => desired.clone(),
    };
    Ok((desired, comparable))
}

fn plan_json(server: &str, plan: &Plan) -> serde_json::Value {
    serde_json::json!({
        "server": server,
        "additions": plan.additions,
        "removals": plan.removals,
        "diff": plan.diff,
    })
}

async fn firewall_command(
    command: Commands,
    rec: &Reconciler<RobotClient>,
    out: &Output,
) -> Result<()> {
    match command {
        Commands::AllowSsh(args) => {
            let result = rec
                .allow_ssh(&args.server, &sources(args.ips, Sources::MyIp))
                .await;
            audit_report(EventType::AllowSsh, &args.server, &result).await;
            out.report(&args.server, &result?)
        }
        Commands::AllowHttps(args) => {
            let result = rec
                .allow_https(&args.server, &sources(args.ips, Sources::Explicit(Vec::new())))
                .await;
            audit_report(EventType::AllowHttps, &args.server, &result).await;
            out.report(&args.server, &result?)
        }
        Commands::AllowMosh(args) => {
            let result = rec
                .allow_mosh(&args.server, &sources(args.ips, Sources::MyIp))
                .await;
            audit_report(EventType::AllowMosh, &args.server, &result).await;
            out.report(&args.server, &result?)
        }
        Commands::BlockHttp { server } => {
            let result = rec.block_http(&server).await;
            audit_report(EventType::BlockHttp, &server, &result).await;
            out.report(&server, &result?)
        }
        Commands::Plan { server, file } => {
            let (_, desired) = load_desired(rec, &file).await?;
            let live = rec.list_rules(&server, None).await?;
            let plan = declarative::plan(&live, &desired);
            out.print(|| plan_text(&server, &plan), &plan_json(&server, &plan))
        }
        Commands::Apply { server, file } => {
            let (desired, comparable) = load_desired(rec, &file).await?;
            let live = rec.list_rules(&server, None).await?;
            let plan = declarative::plan(&live, &comparable);

            if !out.json {
                print!("{}", plan_text(&server, &plan));
            }
            if plan.has_changes()
                && !out.confirm(&format!("Replace the firewall of server {server}?"))?
            {
                println!("Aborted.");
                return Ok(());
            }

            let result = rec.reconcile(&server, &desired).await;
            let details = serde_json::json!({
                "file": file.display().to_string(),
                "template_id": desired.template_id,
                "additions": plan.additions,
                "removals": plan.removals,
            });
            audit::log_operation(EventType::Reconcile, Some(&server), details, error_text(&result))
                .await;
            let outcome = result?;
            out.print(
                || {
                    if outcome.changed {
                        display::firewall_table(&server, &outcome.config, None)
                    } else {
                        format!("Firewall of server {server} already matches {}\n", file.display())
                    }
                },
                &outcome.config,
            )
        }
        Commands::Wait { server } => {
            let config = rec.wait_until_ready(&server).await?;
            out.print(
                || format!("Firewall of server {server} is {}\n", config.status),
                &config,
            )
        }
        Commands::Reset { server } => {
            if !out.confirm(&format!(
                "Remove all rules of server {server} and disable its firewall?"
            ))? {
                println!("Aborted.");
                return Ok(());
            }
            let result = rec.reset_to_empty(&server).await;
            audit::log_operation(
                EventType::ResetFirewall,
                Some(&server),
                serde_json::json!({}),
                error_text(&result),
            )
            .await;
            let config = result?;
            out.print(|| display::firewall_table(&server, &config, None), &config)
        }
        Commands::Rules(_) | Commands::Template(_) | Commands::Config(_) => Ok(()),
    }
}

fn plan_text(server: &str, plan: &Plan) -> String {
    if plan.has_changes() {
        format!(
            "Plan for server {server}: {} to add, {} to remove\n{}",
            plan.additions, plan.removals, plan.diff
        )
    } else {
        format!("Plan for server {server}: no changes\n")
    }
}

async fn rules_command(
    command: RulesCommand,
    rec: &Reconciler<RobotClient>,
    out: &Output,
) -> Result<()> {
    match command {
        RulesCommand::List { server, direction } => {
            let config = rec.list_rules(&server, direction).await?;
            out.print(|| display::firewall_table(&server, &config, direction), &config)
        }
        RulesCommand::Add(args) => {
            let result = rec
                .add_rule(
                    &args.server,
                    args.direction,
                    &args.template(),
                    &args.sources,
                    &args.destinations,
                )
                .await;
            audit_report(EventType::AddRule, &args.server, &result).await;
            out.report(&args.server, &result?)
        }
        RulesCommand::Delete {
            server,
            direction,
            name,
            index,
        } => {
            let selector = match (name, index) {
                (Some(name), _) => RuleSelector::Name(name),
                (None, Some(index)) => RuleSelector::Index(index),
                (None, None) => {
                    return Err(Error::validation("rule", "pass --name or --index"));
                }
            };
            let result = rec.delete_rule(&server, direction, &selector).await;
            let details = audit::direction_details(
                direction,
                serde_json::json!({
                    "selector": format!("{selector:?}"),
                    "rule": result.as_ref().ok().map(|rule| rule.name.clone()),
                }),
            );
            audit::log_operation(EventType::DeleteRule, Some(&server), details, error_text(&result))
                .await;
            let rule = result?;
            out.print(
                || format!("Deleted {direction} rule '{}' from server {server}\n", rule.name),
                &rule,
            )
        }
    }
}

async fn template_command(
    command: TemplateCommand,
    rec: &Reconciler<RobotClient>,
    out: &Output,
) -> Result<()> {
    match command {
        TemplateCommand::List => {
            let list = rec.list_templates().await?;
            out.print(|| display::templates_table(&list), &list)
        }
        TemplateCommand::Show { id } => {
            let template = rec.get_template(id).await?;
            out.print(|| display::template_details(&template), &template)
        }
        TemplateCommand::Create {
            name,
            from_server,
            file,
        } => {
            let missing_name = || Error::validation("--name", "a template name is required");
            let result = match (from_server.as_deref(), file) {
                (Some(server), _) => {
                    let name = name.ok_or_else(missing_name)?;
                    rec.create_template_from_server(server, &name).await
                }
                (None, Some(file)) => {
                    let mut draft = templates::load_draft(&file).await?;
                    if let Some(name) = name {
                        draft.name = name;
                    }
                    rec.create_template(&draft).await
                }
                (None, None) => {
                    let name = name.ok_or_else(missing_name)?;
                    rec.create_template(&TemplateDraft::empty(name)).await
                }
            };
            let created = result
                .as_ref()
                .ok()
                .map(|t| serde_json::json!({ "id": t.id, "name": t.name }));
            let details = serde_json::json!({
                "from_server": from_server,
                "template": created,
            });
            audit::log_operation(EventType::CreateTemplate, None, details, error_text(&result))
                .await;
            let template = result?;
            out.print(
                || format!("Created template {} ({})\n", template.id, template.name),
                &template,
            )
        }
        TemplateCommand::Update { id, file } => {
            let draft = templates::load_draft(&file).await?;
            let result = rec.update_template(id, &draft).await;
            audit::log_operation(
                EventType::UpdateTemplate,
                None,
                serde_json::json!({ "id": id, "name": draft.name }),
                error_text(&result),
            )
            .await;
            let template = result?;
            out.print(|| display::template_details(&template), &template)
        }
        TemplateCommand::Apply { id, server } => {
            if !out.confirm(&format!(
                "Replace the firewall of server {server} with template {id}?"
            ))? {
                println!("Aborted.");
                return Ok(());
            }
            let result = rec.apply_template(&server, id).await;
            audit::log_operation(
                EventType::ApplyTemplate,
                Some(&server),
                serde_json::json!({ "template_id": id }),
                error_text(&result),
            )
            .await;
            let config = result?;
            out.print(|| display::firewall_table(&server, &config, None), &config)
        }
        TemplateCommand::Delete { id } => {
            if !out.confirm(&format!("Delete template {id}?"))? {
                println!("Aborted.");
                return Ok(());
            }
            let result = rec.delete_template(id).await;
            audit::log_operation(
                EventType::DeleteTemplate,
                None,
                serde_json::json!({ "id": id }),
                error_text(&result),
            )
            .await;
            result?;
            out.print(
                || format!("Deleted template {id}\n"),
                &serde_json::json!({ "deleted": id }),
            )
        }
        TemplateCommand::Export { id, file } => {
            let draft = TemplateDraft::from(rec.get_template(id).await?);
            templates::save_draft(&file, &draft).await?;
            out.print(
                || format!("Wrote template {id} to {}\n", file.display()),
                &draft,
            )
        }
    }
}

async fn config_command(
    command: ConfigCommand,
    path: Option<&Path>,
    effective: &AppConfig,
    out: &Output,
) -> Result<()> {
    match command {
        ConfigCommand::Show => {
            let redacted = effective.redacted();
            out.print(
                || {
                    let location = path
                        .map(Path::to_path_buf)
                        .or_else(config::default_config_path)
                        .map_or_else(|| "(none)".to_string(), |p| p.display().to_string());
                    let body = serde_json::to_string_pretty(&redacted).unwrap_or_default();
                    format!("Config file: {location}\n{body}\n")
                },
                &redacted,
            )
        }
        ConfigCommand::SetCredentials {
            user,
            password,
            base_url,
        } => {
            let path = path
                .map(Path::to_path_buf)
                .or_else(config::default_config_path)
                .ok_or_else(|| Error::Config("no config directory available".to_string()))?;

            let password = match password {
                Some(password) => password,
                None => read_secret("Web service password: ")?,
            };
            if password.is_empty() {
                return Err(Error::validation("password", "must not be empty"));
            }

            // Start from the file, not the effective config, so environment
            // overrides are never persisted.
            let mut stored = config::load_config_from(&path).await?;
            stored.username = Some(user);
            stored.password = Some(password);
            if let Some(base_url) = base_url {
                stored.base_url = base_url;
            }
            config::save_config_to(&path, &stored).await?;
            println!("Saved credentials to {}", path.display());
            Ok(())
        }
    }
}
