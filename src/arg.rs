use std::ffi::OsString;
use std::path::PathBuf;

use clap::{
    App,
    AppSettings,
    Arg,
    ArgMatches,
    SubCommand,
};

use crate::config::config_paths;
use crate::error::{
    Error,
    Result,
};

/// What the user asked for.
#[derive(Debug, PartialEq)]
pub enum Command {
    List {
        exact: bool,
    },
    Wait {
        dest: PathBuf,
        age: u64,
        exact: bool,
    },
    Upload {
        args: Vec<String>,
        tag: Option<String>,
    },
    Download {
        tag: String,
        dest: PathBuf,
    },
    Delete {
        tag: String,
    },
    Reset,
    Serve,
}

pub struct Settings {
    pub url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub config: Option<PathBuf>,
    pub debug: bool,
    pub command: Command,
}

fn epilog() -> String {
    let paths: Vec<String> = config_paths()
        .iter()
        .map(|p| p.display().to_string())
        .collect();
    format!("Configuration file is searched for in the following locations: {}", paths.join(", "))
}

fn app(epilog: &str) -> App<'_, '_> {
    let mut o = App::new("bush");
    o = o.version(env!("CARGO_PKG_VERSION"));
    o = o.about("Simplistic file sharing.");
    o = o.after_help(epilog);
    o = o.setting(AppSettings::SubcommandRequiredElseHelp);

    o = o.arg(
        Arg::with_name("url")
            .long("url")
            .short("u")
            .takes_value(true)
            .global(true)
            .help("API endpoint")
            );
    o = o.arg(
        Arg::with_name("username")
            .long("username")
            .short("U")
            .takes_value(true)
            .global(true)
            .help("API username")
            );
    o = o.arg(
        Arg::with_name("password")
            .long("password")
            .short("P")
            .takes_value(true)
            .global(true)
            .help("API password")
            );
    o = o.arg(
        Arg::with_name("config")
            .long("config")
            .short("c")
            .takes_value(true)
            .global(true)
            .help("path overwriting the default configuration file")
            );
    o = o.arg(
        Arg::with_name("debug")
            .long("debug")
            .short("d")
            .global(true)
            .help("full diagnostics for errors")
            );

    let exact = Arg::with_name("exact")
        .long("exact")
        .short("x")
        .help("show exact dates instead of ages");

    o = o.subcommand(
        SubCommand::with_name("ls")
            .alias("list")
            .about("list information about available files")
            .arg(exact.clone())
            );
    o = o.subcommand(
        SubCommand::with_name("wait")
            .about("wait for a new file and download it")
            .arg(Arg::with_name("dest")
                 .default_value("./")
                 .help("path where the file should be downloaded"))
            .arg(Arg::with_name("age")
                 .long("age")
                 .short("a")
                 .takes_value(true)
                 .default_value("0")
                 .help("this many seconds old is new"))
            .arg(exact)
            );
    o = o.subcommand(
        SubCommand::with_name("up")
            .alias("upload")
            .about("upload new file(s)")
            .arg(Arg::with_name("file")
                 .required(true)
                 .multiple(true)
                 .help("path of the file(s) to upload, optionally followed by the tag"))
            .arg(Arg::with_name("tag")
                 .long("tag")
                 .short("t")
                 .takes_value(true)
                 .help("the name associated with the file(s) to upload"))
            );
    o = o.subcommand(
        SubCommand::with_name("dl")
            .alias("download")
            .about("download a file")
            .arg(Arg::with_name("tag")
                 .required(true)
                 .help("the name associated with the file to download"))
            .arg(Arg::with_name("dest")
                 .default_value("./")
                 .help("path where the file should be downloaded"))
            );
    o = o.subcommand(
        SubCommand::with_name("rm")
            .alias("delete")
            .about("remove an uploaded file")
            .arg(Arg::with_name("tag")
                 .required(true)
                 .help("the name associated with the file to delete"))
            );
    o = o.subcommand(
        SubCommand::with_name("reset")
            .about("delete all files")
            );
    o = o.subcommand(
        SubCommand::with_name("serve")
            .about("act as a bush server")
            );
    o
}

fn command_from_args(arg: &ArgMatches) -> Result<Command> {
    let cmd = match arg.subcommand() {
        ("ls", Some(m)) => Command::List {
            exact: m.is_present("exact"),
        },
        ("wait", Some(m)) => {
            let age_src = m.value_of("age").unwrap_or("0");
            let age = match age_src.parse::<u64>() {
                Ok(v) => v,
                Err(_) => {
                    return Err(Error::Validation(format!("age must be a number of seconds, not {:?}", age_src)));
                },
            };
            Command::Wait {
                dest: PathBuf::from(m.value_of("dest").unwrap_or("./")),
                age,
                exact: m.is_present("exact"),
            }
        },
        ("up", Some(m)) => Command::Upload {
            args: m.values_of("file").map(|v| v.map(|s| s.to_string()).collect()).unwrap_or_default(),
            tag: m.value_of("tag").map(|s| s.to_string()),
        },
        ("dl", Some(m)) => Command::Download {
            tag: m.value_of("tag").unwrap_or_default().to_string(),
            dest: PathBuf::from(m.value_of("dest").unwrap_or("./")),
        },
        ("rm", Some(m)) => Command::Delete {
            tag: m.value_of("tag").unwrap_or_default().to_string(),
        },
        ("reset", _) => Command::Reset,
        ("serve", _) => Command::Serve,
        (other, _) => {
            return Err(Error::Validation(format!("unknown command {:?}", other)));
        },
    };
    Ok(cmd)
}

impl Settings {

    fn from_matches(arg: &ArgMatches) -> Result<Settings> {
        // global args are propagated into the subcommand matches
        let sub = arg.subcommand().1.unwrap_or(arg);
        let value = |k: &str| sub.value_of(k).or_else(|| arg.value_of(k)).map(|s| s.to_string());
        Ok(Settings {
            url: value("url"),
            username: value("username"),
            password: value("password"),
            config: value("config").map(PathBuf::from),
            debug: sub.is_present("debug") || arg.is_present("debug"),
            command: command_from_args(arg)?,
        })
    }

    /// Parse an explicit argument list; the first item is the program name.
    pub fn from_iter<I, T>(args: I) -> std::result::Result<Result<Settings>, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        let epilog = epilog();
        let m = app(&epilog).get_matches_from_safe(args)?;
        Ok(Settings::from_matches(&m))
    }

    /// Parse the process arguments, exiting with usage on malformed input.
    pub fn from_args() -> Result<Settings> {
        let epilog = epilog();
        let m = app(&epilog).get_matches();
        Settings::from_matches(&m)
    }
}

#[cfg(test)]
mod tests {
    use super::{
        Command,
        Settings,
    };
    use std::path::PathBuf;

    fn parse(args: &[&str]) -> Settings {
        Settings::from_iter(args.iter()).unwrap().unwrap()
    }

    #[test]
    fn test_global_flags() {
        let s = parse(&["bush", "-u", "http://h/", "-U", "me", "ls", "-x"]);
        assert_eq!(s.url.as_deref(), Some("http://h/"));
        assert_eq!(s.username.as_deref(), Some("me"));
        assert!(!s.debug);
        assert_eq!(s.command, Command::List { exact: true });

        let s = parse(&["bush", "reset", "--debug"]);
        assert!(s.debug);
        assert_eq!(s.command, Command::Reset);
    }

    #[test]
    fn test_wait() {
        let s = parse(&["bush", "wait", "/tmp", "--age", "30"]);
        assert_eq!(s.command, Command::Wait {
            dest: PathBuf::from("/tmp"),
            age: 30,
            exact: false,
        });
        let s = parse(&["bush", "wait"]);
        assert_eq!(s.command, Command::Wait {
            dest: PathBuf::from("./"),
            age: 0,
            exact: false,
        });
        assert!(Settings::from_iter(["bush", "wait", "-a", "soon"].iter()).unwrap().is_err());
        assert!(Settings::from_iter(["bush", "wait", "-a", "-5"].iter()).map_or(true, |r| r.is_err()));
        let s = parse(&["bush", "wait", "-a", "+7"]);
        assert!(matches!(s.command, Command::Wait { age: 7, .. }));
    }

    #[test]
    fn test_upload_and_aliases() {
        let s = parse(&["bush", "upload", "a.txt", "b.txt", "mytag"]);
        assert_eq!(s.command, Command::Upload {
            args: vec![String::from("a.txt"), String::from("b.txt"), String::from("mytag")],
            tag: None,
        });
        let s = parse(&["bush", "up", "a.txt", "-t", "t"]);
        assert_eq!(s.command, Command::Upload {
            args: vec![String::from("a.txt")],
            tag: Some(String::from("t")),
        });
        let s = parse(&["bush", "download", "t"]);
        assert_eq!(s.command, Command::Download {
            tag: String::from("t"),
            dest: PathBuf::from("./"),
        });
        let s = parse(&["bush", "rm", "t"]);
        assert_eq!(s.command, Command::Delete { tag: String::from("t") });
    }

    #[test]
    fn test_missing_subcommand() {
        assert!(Settings::from_iter(["bush"].iter()).is_err());
    }
}
