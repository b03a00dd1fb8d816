use std::io::{
    self,
    BufRead,
    Write,
};
use std::path::PathBuf;
use std::process::exit;
use std::sync::atomic::{
    AtomicBool,
    Ordering,
};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use env_logger::Env;
use log::{
    debug,
    info,
};
use signal_hook::consts::SIGINT;
use signal_hook::iterator::Signals;
use url::Url;

use bush::arg::{
    Command,
    Settings,
};
use bush::auth::Credential;
use bush::client::{
    path_exists,
    resolve_tag,
    Client,
    Progress,
};
use bush::clock::{
    Clock,
    SystemClock,
};
use bush::config::{
    self,
    Config,
    LOCAL_URL,
};
use bush::entry::FileEntry;
use bush::error::{
    Error,
    Result,
};
use bush::poll::{
    wait_and_download,
    DEFAULT_INTERVAL,
};
use bush::server::{
    Server,
    ServerSettings,
};

/// Progress on stderr, one line rewritten in place.
struct ShowProgress {
    total: Option<u64>,
    last: u64,
}

impl ShowProgress {
    fn new() -> ShowProgress {
        ShowProgress {
            total: None,
            last: u64::MAX,
        }
    }
}

impl Progress for ShowProgress {
    fn start(&mut self, total: Option<u64>) {
        self.total = total;
    }

    fn update(&mut self, done: u64) {
        let line = match self.total {
            Some(t) if t > 0 => {
                let pct = done * 100 / t;
                if pct == self.last {
                    return;
                }
                self.last = pct;
                format!("\r{:>3}% {} / {} bytes", pct, done, t)
            },
            _ => format!("\r{} bytes", done),
        };
        eprint!("{}", line);
    }

    fn finish(&mut self) {
        eprintln!();
    }
}

/// SIGINT handling. Loops that check `requested` stop on their own; anywhere
/// else the process exits right away.
struct Interrupt {
    requested: Arc<AtomicBool>,
    cooperative: Arc<AtomicBool>,
}

impl Interrupt {
    fn install() -> io::Result<Interrupt> {
        let requested = Arc::new(AtomicBool::new(false));
        let cooperative = Arc::new(AtomicBool::new(false));
        let mut signals = Signals::new([SIGINT])?;
        let r = requested.clone();
        let c = cooperative.clone();
        thread::spawn(move || {
            for _ in signals.forever() {
                let again = r.swap(true, Ordering::SeqCst);
                if again || !c.load(Ordering::SeqCst) {
                    eprintln!("interrupted");
                    exit(0);
                }
            }
        });
        Ok(Interrupt {
            requested,
            cooperative,
        })
    }

    fn set_cooperative(&self, v: bool) {
        self.cooperative.store(v, Ordering::SeqCst);
    }
}

fn confirmation(msg: &str) -> bool {
    eprintln!("{}", msg);
    eprint!("Do you want to proceed? (y/N) ");
    let _ = io::stderr().flush();
    let mut answer = String::new();
    if io::stdin().lock().read_line(&mut answer).is_err() {
        return false;
    }
    matches!(answer.trim().to_lowercase().as_str(), "y" | "yes" | "t" | "true" | "on" | "1")
}

fn credential_for(username: Option<String>, password: Option<String>) -> Result<Option<Credential>> {
    let username = match username {
        Some(v) => v,
        None => {
            return Ok(None);
        },
    };
    let password = match password {
        Some(v) => v,
        None => {
            match rpassword::prompt_password(format!("Password for {}: ", username)) {
                Ok(v) => v,
                Err(e) => {
                    return Err(Error::Config(format!("cannot read password: {}", e)));
                },
            }
        },
    };
    Ok(Some(Credential::new(&username, &password)))
}

fn connect(settings: &Settings, config: &Config) -> Result<Client> {
    let endpoint = config::resolve_endpoint(
        config,
        settings.url.as_deref(),
        settings.username.as_deref(),
        settings.password.as_deref(),
    )?;
    if !endpoint.url.ends_with('/') {
        eprintln!("\
The API URL doesn't end with a '/', I'll go on and assume you know what
you are doing. But if something fails you might want to try to add one.");
    }
    let credential = credential_for(endpoint.username, endpoint.password)?;
    Client::new(&endpoint.url, credential)
}

fn do_list(client: &Client, exact: bool) -> Result<()> {
    let files = client.list()?;
    let align = files.iter().map(|f| f.tag.chars().count()).max().unwrap_or(0);
    let now = SystemClock.now();
    for f in files {
        println!("{}", f.render(align, exact, now));
    }
    Ok(())
}

fn do_wait(client: &Client, interrupt: &Interrupt, dest: PathBuf, age: u64, exact: bool) -> Result<()> {
    let clock = SystemClock;
    let mut progress = ShowProgress::new();
    let mut found = |entry: &FileEntry| {
        println!("{}", entry.render(0, exact, clock.now()));
    };
    interrupt.set_cooperative(true);
    let r = wait_and_download(
        client,
        &clock,
        Duration::from_secs(age),
        DEFAULT_INTERVAL,
        Some(interrupt.requested.clone()),
        &dest,
        &mut found,
        &mut progress,
    );
    interrupt.set_cooperative(false);
    let (entry, path) = r?;
    debug!("saved {:?} to {:?}", entry.tag, path);
    Ok(())
}

fn do_upload(client: &Client, args: Vec<String>, tag: Option<String>) -> Result<()> {
    let resolved = resolve_tag(args, tag, path_exists);
    if resolved.needs_confirmation {
        let tag = resolved.tag.as_deref().unwrap_or_default();
        if !confirmation(&format!("Tag is also an existing file: {:?}.", tag)) {
            return Err(Error::Validation(String::from("upload aborted")));
        }
    }
    let paths: Vec<PathBuf> = resolved.files.iter().map(PathBuf::from).collect();
    let mut progress = ShowProgress::new();
    let entry = client.upload(&paths, resolved.tag.as_deref(), &mut progress)?;
    info!("stored as {:?}", entry.tag);
    Ok(())
}

fn do_serve(settings: &Settings, config: &Config, interrupt: &Interrupt) -> Result<()> {
    let wanted = settings.url.clone().unwrap_or_else(|| String::from("local"));
    let endpoint = config::resolve_endpoint(config, Some(&wanted), settings.username.as_deref(), settings.password.as_deref())?;
    let url_src = if endpoint.url == "local" { LOCAL_URL } else { endpoint.url.as_str() };
    let url = match Url::parse(url_src) {
        Ok(v) => v,
        Err(e) => {
            return Err(Error::Config(format!("invalid url {:?}: {}", url_src, e)));
        },
    };

    let credential = match (settings.username.as_deref(), settings.password.as_deref()) {
        (Some(u), Some(p)) => Some(Credential::new(u, p)),
        _ => config.server.credential(),
    };
    let serve = ServerSettings {
        host: url.host_str().unwrap_or("127.0.0.1").to_string(),
        port: url.port_or_known_default().unwrap_or(5000),
        data_dir: config.server.data_dir.clone(),
        threads: config.server.threads,
        credential,
    };
    let server = Server::from_settings(&serve)?;
    interrupt.set_cooperative(true);
    server.run(interrupt.requested.clone());
    info!("server stopped");
    Ok(())
}

fn run(settings: Settings, interrupt: &Interrupt) -> Result<()> {
    let config = config::load(settings.config.as_deref())?;

    if settings.command == Command::Serve {
        return do_serve(&settings, &config, interrupt);
    }

    let client = connect(&settings, &config)?;
    match settings.command {
        Command::List { exact } => do_list(&client, exact),
        Command::Wait { dest, age, exact } => do_wait(&client, interrupt, dest, age, exact),
        Command::Upload { args, tag } => do_upload(&client, args, tag),
        Command::Download { tag, dest } => {
            let mut progress = ShowProgress::new();
            client.download(&tag, &dest, &mut progress).map(|_| ())
        },
        Command::Delete { tag } => client.delete(&tag),
        Command::Reset => client.reset(),
        Command::Serve => Ok(()),
    }
}

fn main() {
    let settings = match Settings::from_args() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("{}", e);
            exit(1);
        },
    };
    let debug = settings.debug;

    let level = if debug { "debug" } else { "warn" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let interrupt = match Interrupt::install() {
        Ok(v) => v,
        Err(e) => {
            eprintln!("cannot install interrupt handler: {}", e);
            exit(1);
        },
    };

    match run(settings, &interrupt) {
        Ok(_) => {},
        Err(Error::Interrupted) => {
            eprintln!("interrupted");
        },
        Err(e) => {
            if debug {
                eprintln!("{:?}", e);
            } else {
                eprintln!("{}", e);
            }
            exit(1);
        },
    }
}
