use std::env;
use std::io::{self, ErrorKind, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use restyle_contracts::interpret::InterpretedResponse;
use restyle_contracts::prefs::{PrefStore, Theme};
use restyle_contracts::session::{Operation, Step, UploadedImage};
use restyle_contracts::wizard::styles::{presets_for, sample_prompts};
use restyle_contracts::wizard::Wizard;
use restyle_engine::{SessionEngine, VendorConfig};

#[derive(Debug, Parser)]
#[command(
    name = "restyle",
    version,
    about = "Restyle, generate and creatively rework images through a chat-completions vendor"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Interactive three-step flow: operation, input, style.
    Wizard(WizardArgs),
    /// One-shot submission with everything given as flags.
    Run(RunArgs),
    /// Show or change the stored theme preference.
    Theme(ThemeArgs),
}

#[derive(Debug, Parser)]
struct WizardArgs {
    /// Session directory for events and downloaded results.
    #[arg(long)]
    out: PathBuf,
}

#[derive(Debug, Parser)]
struct RunArgs {
    /// One of: style, creative, generate.
    #[arg(long)]
    operation: String,
    /// Instruction text (required for generate, optional otherwise).
    #[arg(long)]
    prompt: Option<String>,
    /// Preset key, e.g. anime or poster.
    #[arg(long)]
    style: Option<String>,
    /// Image to restyle or rework.
    #[arg(long)]
    image: Option<PathBuf>,
    /// Session directory for events and downloaded results.
    #[arg(long)]
    out: PathBuf,
    /// Skip downloading the result image.
    #[arg(long)]
    no_download: bool,
}

#[derive(Debug, Parser)]
struct ThemeArgs {
    /// light, dark, or toggle; omit to print the current theme.
    value: Option<String>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("restyle error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Wizard(args) => {
            run_wizard(args)?;
            Ok(0)
        }
        Command::Run(args) => run_once(args),
        Command::Theme(args) => {
            run_theme(args)?;
            Ok(0)
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum WizardCommand {
    Help,
    Quit,
    Restart,
    Back,
    Next,
    Go,
    List,
    Retry,
    Add(Vec<String>),
    Remove(String),
    Select(String),
    Style(String),
    Unknown(String),
    Text(String),
}

fn parse_command(input: &str) -> WizardCommand {
    let trimmed = input.trim();
    let Some(tail) = trimmed.strip_prefix('/') else {
        return WizardCommand::Text(trimmed.to_string());
    };
    let (command, arg) = match tail.split_once(char::is_whitespace) {
        Some((head, rest)) => (head, rest.trim()),
        None => (tail, ""),
    };
    match command.to_ascii_lowercase().as_str() {
        "help" => WizardCommand::Help,
        "quit" | "exit" => WizardCommand::Quit,
        "restart" => WizardCommand::Restart,
        "back" => WizardCommand::Back,
        "next" => WizardCommand::Next,
        "go" | "start" => WizardCommand::Go,
        "list" => WizardCommand::List,
        "retry" => WizardCommand::Retry,
        "add" => {
            let paths = shell_words::split(arg)
                .unwrap_or_else(|_| arg.split_whitespace().map(str::to_string).collect())
                .into_iter()
                .filter(|value| !value.is_empty())
                .collect();
            WizardCommand::Add(paths)
        }
        "remove" => WizardCommand::Remove(arg.to_string()),
        "select" => WizardCommand::Select(arg.to_string()),
        "style" => WizardCommand::Style(arg.to_string()),
        other => WizardCommand::Unknown(other.to_string()),
    }
}

fn run_wizard(args: WizardArgs) -> Result<()> {
    let config = VendorConfig::from_env()?;
    let mut engine = SessionEngine::new(&args.out, config)?;
    let mut wizard = Wizard::new();
    let prefs = PrefStore::new(prefs_path());

    println!(
        "Restyle wizard started ({} theme). Type /help for commands.",
        prefs.theme()
    );

    let stdin = io::stdin();
    let mut line = String::new();
    let mut rendered = None;
    loop {
        let panel = (wizard.step(), wizard.state().result_open);
        if rendered != Some(panel) {
            render_panel(&wizard);
            rendered = Some(panel);
        }

        print!("> ");
        io::stdout().flush()?;
        line.clear();
        let read = match stdin.read_line(&mut line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            break;
        }
        let input = line.trim_end_matches(['\n', '\r']).trim();
        if input.is_empty() {
            continue;
        }

        match parse_command(input) {
            WizardCommand::Help => print_help(),
            WizardCommand::Quit => break,
            WizardCommand::Restart => {
                if confirm("Restarting clears every selection. Continue? [y/N] ")? {
                    wizard.restart();
                }
            }
            WizardCommand::Back => {
                wizard.back();
            }
            WizardCommand::Retry => {
                if wizard.state().result_open {
                    wizard.close_result_for_retry();
                } else {
                    toast("no result to retry from");
                }
            }
            WizardCommand::List => {
                for image in &wizard.state().images {
                    println!("  {} ({} bytes, {})", image.name, image.size, image.mime);
                }
                if wizard.state().images.is_empty() {
                    println!("  (no images uploaded)");
                }
            }
            WizardCommand::Add(paths) => {
                if paths.is_empty() {
                    toast("/add requires at least one path");
                }
                for path in paths {
                    match UploadedImage::from_path(&path) {
                        Ok(image) => {
                            let name = image.name.clone();
                            match wizard.add_image(image) {
                                Ok(()) => println!("Added {name}"),
                                Err(err) => toast(&err.to_string()),
                            }
                        }
                        Err(err) => toast(&format!("{err:#}")),
                    }
                }
            }
            WizardCommand::Remove(name) => {
                if wizard.remove_image(&name) {
                    println!("Removed {name}");
                } else {
                    toast(&format!("no uploaded image named {name}"));
                }
            }
            WizardCommand::Select(name) => {
                if wizard.state_mut().select_image(&name) {
                    println!("Will send {name}");
                } else {
                    toast(&format!("no uploaded image named {name}"));
                }
            }
            WizardCommand::Style(key) => match wizard.select_style(&key) {
                Ok(()) => println!(
                    "Preset {key} selected; instruction seeded to: {}",
                    wizard.state().custom_instruction
                ),
                Err(err) => toast(&err),
            },
            WizardCommand::Next => {
                if let Err(err) = wizard.advance() {
                    toast(&err);
                }
            }
            WizardCommand::Go => {
                if wizard.state().result_open {
                    toast("close the result with /retry or /back first");
                } else if let Some(submission) = wizard.submission() {
                    let response = engine.submit(&submission)?;
                    render_result(&mut engine, &submission.operation, &response)?;
                    wizard.open_result(response);
                } else {
                    toast("nothing to submit yet; finish the steps (/next) and pick a preset or type an instruction");
                }
            }
            WizardCommand::Unknown(command) => {
                toast(&format!("unknown command /{command}; try /help"));
            }
            WizardCommand::Text(text) => match wizard.step() {
                Step::ChooseOperation => match operation_from_input(&text) {
                    Some(operation) => wizard.select_operation(operation),
                    None => toast("choose style, creative or generate"),
                },
                Step::ProvideInput => {
                    wizard.set_instruction(&text);
                    if wizard.operation() == Some(Operation::Generate) {
                        println!("Description recorded. /next to continue.");
                    } else {
                        println!("Note saved; images drive this step. /add <path> to upload.");
                    }
                }
                Step::ConfirmStyle => {
                    if wizard.operation() == Some(Operation::Generate) {
                        wizard.set_instruction(&text);
                    } else {
                        wizard.edit_custom_instruction(&text);
                        if wizard.state().selected_style.is_none() {
                            println!("Custom instruction set (preset cleared).");
                        }
                    }
                }
            },
        }
    }

    engine.finish()?;
    Ok(())
}

fn run_once(args: RunArgs) -> Result<i32> {
    let operation = Operation::from_key(&args.operation)
        .with_context(|| format!("unknown operation: {}", args.operation))?;
    let config = VendorConfig::from_env()?;
    let mut engine = SessionEngine::new(&args.out, config)?;
    let mut wizard = Wizard::new();
    wizard.select_operation(operation);

    if let Some(path) = &args.image {
        let image = UploadedImage::from_path(path)?;
        wizard
            .add_image(image)
            .map_err(|err| anyhow::anyhow!("{err}"))?;
    }
    if operation == Operation::Generate {
        let prompt = args
            .prompt
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .context("--prompt is required for generate")?;
        wizard.set_instruction(prompt);
    }
    wizard.advance().map_err(|err| anyhow::anyhow!("{err}"))?;

    if let Some(key) = &args.style {
        wizard
            .select_style(key)
            .map_err(|err| anyhow::anyhow!("{err}"))?;
    }
    if operation != Operation::Generate {
        if let Some(prompt) = args.prompt.as_deref().filter(|v| !v.trim().is_empty()) {
            wizard.edit_custom_instruction(prompt);
        }
    }

    let submission = wizard
        .submission()
        .context("nothing to submit; pass --style or --prompt")?;
    let response = engine.submit(&submission)?;
    let failed = response.is_error();
    if args.no_download {
        print_response(&submission.operation, &response);
    } else {
        render_result(&mut engine, &submission.operation, &response)?;
    }
    engine.finish()?;
    Ok(if failed { 1 } else { 0 })
}

fn run_theme(args: ThemeArgs) -> Result<()> {
    let prefs = PrefStore::new(prefs_path());
    match args.value.as_deref() {
        None => println!("{}", prefs.theme()),
        Some("toggle") => {
            let next = prefs.theme().toggled();
            prefs.set_theme(next)?;
            println!("{next}");
        }
        Some(value) => {
            let theme = Theme::from_key(value)
                .with_context(|| format!("unknown theme: {value} (use light or dark)"))?;
            prefs.set_theme(theme)?;
            println!("{theme}");
        }
    }
    Ok(())
}

fn operation_from_input(input: &str) -> Option<Operation> {
    match input.trim() {
        "1" => Some(Operation::Style),
        "2" => Some(Operation::Creative),
        "3" => Some(Operation::Generate),
        other => Operation::from_key(other),
    }
}

fn render_panel(wizard: &Wizard) {
    if wizard.state().result_open {
        println!("-- Result (use /retry to adjust, /restart to start over) --");
        return;
    }
    match wizard.step() {
        Step::ChooseOperation => {
            println!("-- Step 1/3: choose an operation --");
            println!("  1) style     - restyle an uploaded image");
            println!("  2) creative  - rework an image into a new form");
            println!("  3) generate  - create an image from one line of text");
        }
        Step::ProvideInput => {
            let operation = wizard.operation();
            println!("-- Step 2/3: provide input --");
            match operation {
                Some(Operation::Generate) => {
                    println!("Type a description of the image you want.")
                }
                Some(Operation::Style) => {
                    println!("Upload the image to restyle with /add <path>.")
                }
                Some(Operation::Creative) => {
                    println!("Upload an image with /add <path>; the creative text comes next.")
                }
                None => {}
            }
            if let Some(operation) = operation {
                println!("Examples:");
                for prompt in sample_prompts(operation) {
                    println!("  · {prompt}");
                }
            }
            println!("/next when ready.");
        }
        Step::ConfirmStyle => {
            println!("-- Step 3/3: choose a style and confirm --");
            if let Some(operation) = wizard.operation() {
                for spec in presets_for(operation) {
                    println!("  /style {:<12} {} - {}", spec.key, spec.title, spec.prompt);
                }
            }
            println!("Or type a custom instruction. /go to submit.");
        }
    }
}

fn render_result(
    engine: &mut SessionEngine,
    operation: &Operation,
    response: &InterpretedResponse,
) -> Result<()> {
    print_response(operation, response);
    if let Some(url) = response.image_url.as_deref() {
        if url.starts_with("http") {
            match engine.download_result(url) {
                Ok(path) => println!("Saved result to {}", path.display()),
                Err(err) => toast(&format!("download failed: {err:#}")),
            }
        }
    }
    Ok(())
}

fn print_response(operation: &Operation, response: &InterpretedResponse) {
    let tag = if response.is_error() {
        "处理出错"
    } else {
        operation.display_name()
    };
    println!("[{tag}]");
    if !response.body.is_empty() {
        println!("{}", response.body);
    }
    match response.image_url.as_deref() {
        Some(url) => println!("Image: {url}"),
        None if !response.is_error() => println!("(no image in this reply)"),
        None => {}
    }
}

fn print_help() {
    println!("Commands:");
    println!("  /add <path>...   upload images (step 2)");
    println!("  /remove <name>   drop an upload");
    println!("  /select <name>   choose which upload is sent");
    println!("  /list            list uploads");
    println!("  /style <key>     pick a preset (step 3)");
    println!("  /next /back      move between steps");
    println!("  /go              submit");
    println!("  /retry           leave the result and adjust");
    println!("  /restart         confirm, then start over");
    println!("  /quit            leave the wizard");
    println!("Anything else is treated as instruction text.");
}

fn toast(message: &str) {
    eprintln!("! {message}");
}

fn confirm(prompt: &str) -> Result<bool> {
    print!("{prompt}");
    io::stdout().flush()?;
    let mut answer = String::new();
    io::stdin().read_line(&mut answer)?;
    Ok(matches!(answer.trim(), "y" | "Y" | "yes"))
}

fn prefs_path() -> PathBuf {
    if let Ok(path) = env::var("RESTYLE_PREFS") {
        let trimmed = path.trim();
        if !trimmed.is_empty() {
            return PathBuf::from(trimmed);
        }
    }
    match env::var("HOME") {
        Ok(home) if !home.trim().is_empty() => {
            PathBuf::from(home).join(".restyle").join("prefs.json")
        }
        _ => PathBuf::from(".restyle-prefs.json"),
    }
}
