use std::{
    error::Error,
    io::{BufRead, Write},
    path::{Path, PathBuf},
    process::ExitCode,
    sync::Arc,
    time::Duration,
};

use clap::{Parser, Subcommand};
use reveille::{
    alarm::parse_time,
    notifier::PREVIEW_LENGTH,
    web::{self, AppState},
    AlarmBuilder, AlarmStore, AudioNotifier, Config, LocalClock, Notifier, Poller, SoundLibrary,
    TimeOfDay,
};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// config file to use instead of the per-user one
    #[arg(long, env = "REVEILLE_CONFIG", global = true)]
    config: Option<PathBuf>,
    /// alarm file to use instead of the configured one
    #[arg(long, env = "REVEILLE_ALARMS", global = true)]
    alarms: Option<PathBuf>,
    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// write the default config file
    Init {
        #[clap(long, short)]
        force: bool,
    },
    /// add an alarm, e.g. `add 7:30am --label "wake up"`; asks for the time when it's left out
    Add {
        time: Option<String>,
        #[clap(long, short)]
        label: Option<String>,
        /// ringtone name in the sounds directory, or a path
        #[clap(long, short)]
        sound: Option<String>,
        /// 0-100
        #[clap(long, short)]
        volume: Option<f32>,
    },
    List,
    Delete {
        id: u64,
    },
    Enable {
        id: u64,
    },
    Disable {
        id: u64,
    },
    /// list the available ringtones
    Sounds,
    /// play a ringtone for a moment
    TestSound {
        sound: Option<String>,
    },
    /// wait for alarms in the foreground (the default)
    Run,
    /// wait for alarms and serve the web page
    Serve {
        /// address to listen on, e.g. 127.0.0.1:8000
        #[clap(long)]
        addr: Option<String>,
        /// open the page in a browser
        #[clap(long)]
        open: bool,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // logs go to a file, a failure there shouldn't stop the clock
    if let Err(e) = simple_file_logger::init_logger!("reveille") {
        eprintln!("couldn't initialize logger: {e}");
    }

    match try_main(Args::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn try_main(args: Args) -> Result<(), Box<dyn Error>> {
    let config_path = args.config.unwrap_or_else(Config::config_path);
    let mut config = Config::load(&config_path)?;
    if let Some(alarms) = args.alarms {
        config.alarms_path = alarms;
    }

    match args.command.unwrap_or(Command::Run) {
        Command::Init { force } => init(&config_path, &config, force)?,
        Command::Add {
            time,
            label,
            sound,
            volume,
        } => {
            let store = AlarmStore::open(&config.alarms_path)?;
            let builder = match time {
                Some(time) => {
                    let (hour, minute, time_of_day) = parse_time(&time)?;
                    AlarmBuilder::new(hour, minute, time_of_day).label(label)
                }
                None => prompt_alarm(label)?,
            };
            let alarm =
                store.insert(builder.sound(sound).volume(volume.unwrap_or(config.volume)))?;
            println!("added {alarm}");
        }
        Command::List => {
            let alarms = AlarmStore::open(&config.alarms_path)?.list();
            if alarms.is_empty() {
                println!("no alarms");
            }
            for alarm in alarms {
                println!("{alarm}");
            }
        }
        Command::Delete { id } => {
            let alarm = AlarmStore::open(&config.alarms_path)?.delete(id)?;
            println!("deleted {alarm}");
        }
        Command::Enable { id } => {
            let alarm = AlarmStore::open(&config.alarms_path)?.set_enabled(id, true)?;
            println!("enabled {alarm}");
        }
        Command::Disable { id } => {
            let alarm = AlarmStore::open(&config.alarms_path)?.set_enabled(id, false)?;
            println!("disabled {alarm}");
        }
        Command::Sounds => {
            let sounds = sound_library(&config).list();
            if sounds.is_empty() {
                println!(
                    "no ringtones, put .mp3 or .wav files in {}",
                    config.sounds_dir.display()
                );
            }
            for sound in sounds {
                println!("{sound}");
            }
        }
        Command::TestSound { sound } => {
            let notifier = AudioNotifier::spawn(sound_library(&config));
            notifier.preview(sound.as_deref())?;
            // the audio thread still has to open the device
            tokio::time::sleep(PREVIEW_LENGTH + Duration::from_millis(500)).await;
        }
        Command::Run => run(config).await?,
        Command::Serve {
            addr,
            open: open_browser,
        } => serve(config, addr, open_browser).await?,
    }
    Ok(())
}

fn sound_library(config: &Config) -> SoundLibrary {
    SoundLibrary::new(&config.sounds_dir, &config.default_sound)
}

fn init(config_path: &Path, config: &Config, force: bool) -> reveille::Result<()> {
    if force || !config_path.exists() {
        Config::new().save(config_path)?;
        println!("wrote {}", config_path.display());
    } else {
        println!(
            "{} already exists, use --force to overwrite it",
            config_path.display()
        );
    }
    match std::fs::create_dir_all(&config.sounds_dir) {
        Ok(()) => println!("put ringtones in {}", config.sounds_dir.display()),
        Err(e) => eprintln!(
            "couldn't create the sounds directory {}: {e}",
            config.sounds_dir.display()
        ),
    }
    Ok(())
}

fn prompt(question: &str) -> reveille::Result<String> {
    print!("{question}");
    std::io::stdout().flush()?;
    let mut answer = String::new();
    if std::io::stdin().lock().read_line(&mut answer)? == 0 {
        return Err(reveille::Error::Validation("no answer given".to_string()));
    }
    Ok(answer.trim().to_string())
}

fn prompt_number(question: &str) -> reveille::Result<u8> {
    let answer = prompt(question)?;
    answer
        .parse()
        .map_err(|_| reveille::Error::Validation(format!("`{answer}` is not a number")))
}

fn prompt_alarm(label: Option<String>) -> reveille::Result<AlarmBuilder> {
    let hour = prompt_number("Hour (1-12): ")?;
    let minute = prompt_number("Minute (0-59): ")?;
    let time_of_day: TimeOfDay = prompt("AM or PM: ")?.parse()?;
    let label = match label {
        Some(label) => Some(label),
        None => Some(prompt("Label (optional): ")?),
    };
    Ok(AlarmBuilder::new(hour, minute, Some(time_of_day)).label(label))
}

/// everything the poller needs, started
struct Running {
    store: Arc<AlarmStore>,
    notifier: Arc<dyn Notifier>,
    poller: reveille::PollerHandle,
}

fn start(config: &Config) -> reveille::Result<Running> {
    let store = Arc::new(AlarmStore::open(&config.alarms_path)?);
    let notifier: Arc<dyn Notifier> = Arc::new(AudioNotifier::spawn(sound_library(config)));
    let poller = Poller::new(store.clone(), notifier.clone(), config.recurrence)
        .spawn(LocalClock, config.poll_interval())?;
    Ok(Running {
        store,
        notifier,
        poller,
    })
}

/// Lines typed on stdin. Read on a plain thread so a pending read never holds up shutdown.
fn stdin_lines() -> tokio::sync::mpsc::UnboundedReceiver<String> {
    let (sender, receiver) = tokio::sync::mpsc::unbounded_channel();
    std::thread::spawn(move || {
        for line in std::io::stdin().lock().lines() {
            let Ok(line) = line else { break };
            if sender.send(line).is_err() {
                break;
            }
        }
    });
    receiver
}

async fn run(config: Config) -> reveille::Result<()> {
    let Running {
        store,
        notifier,
        poller,
    } = start(&config)?;
    println!(
        "waiting for {} alarm(s), type `stop` to silence them, `list` to show them, `quit` or Ctrl-C to exit",
        store.list().len()
    );

    let mut lines = stdin_lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.recv(), if stdin_open => match line.as_deref().map(str::trim) {
                Some("quit" | "q" | "exit") => break,
                Some("stop" | "s" | "") => notifier.stop_all(),
                Some("list" | "l") => {
                    for alarm in store.list() {
                        println!("{alarm}");
                    }
                }
                Some(other) => println!("unknown command `{other}`"),
                // no terminal attached, only Ctrl-C can stop us now
                None => stdin_open = false,
            },
        }
    }

    notifier.stop_all();
    poller.stop();
    Ok(())
}

/// Show `url` in a browser. Not having one is only worth a warning.
fn open_page(url: &str, opener: impl FnOnce(&str) -> std::io::Result<()>) -> bool {
    match opener(url) {
        Ok(()) => true,
        Err(e) => {
            log::warn!("couldn't open {url} in a browser: {e}");
            eprintln!("couldn't open a browser, go to {url} yourself");
            false
        }
    }
}

async fn serve(
    config: Config,
    addr: Option<String>,
    open_browser: bool,
) -> reveille::Result<()> {
    let Running {
        store,
        notifier,
        poller,
    } = start(&config)?;
    let addr = addr.unwrap_or_else(|| config.http_addr.clone());
    let state = Arc::new(AppState {
        store,
        notifier: notifier.clone(),
        sounds: sound_library(&config),
        config,
    });

    println!("Open http://{addr} to manage alarms, Ctrl-C to exit");
    if open_browser {
        open_page(&format!("http://{addr}"), |url| open::that(url));
    }
    let result = web::serve(state, &addr, async {
        let _ = tokio::signal::ctrl_c().await;
    })
    .await;

    notifier.stop_all();
    poller.stop();
    result
}
