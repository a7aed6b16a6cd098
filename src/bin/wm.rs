//! wm - webmux CLI helper.
//!
//! A thin HTTP client for the webmux daemon, meant to run inside webmux
//! terminals (where `WEBMUX_PORT` and `WEBMUX_SESSION` are set). Lets shell
//! users drive the browser-side features: sessions, uploads, the scratch
//! pad, marked files, and the shared clipboard.

use std::io::Read;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "wm", version, about = "webmux CLI helper", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show server info (upload dir, work dir)
    Info,
    /// List all sessions
    #[command(alias = "list")]
    Ls,
    /// Create a new session
    New {
        name: Option<String>,
    },
    /// Close a session
    Close {
        id: String,
    },
    /// Rename a session
    Rename {
        id: String,
        name: String,
    },
    /// Upload files to the server
    Upload {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Get or set scratch pad text ("-" reads stdin, "clear" clears)
    Scratch {
        args: Vec<String>,
    },
    /// Mark files for download (no args lists, "clear"/"unmark" manage)
    Mark {
        args: Vec<String>,
    },
    /// Copy text to the browser clipboard (argument or stdin)
    #[command(alias = "c")]
    Copy {
        text: Option<String>,
    },
    /// Paste the browser clipboard to stdout
    #[command(alias = "p")]
    #[command(alias = "v")]
    Paste,
    /// Output shell init code (eval in your rc file)
    Init,
}

/// Server address: WEBMUX_HOST wins, else localhost:$WEBMUX_PORT.
fn server_host() -> String {
    if let Ok(host) = std::env::var("WEBMUX_HOST") {
        if !host.is_empty() {
            return host;
        }
    }
    let port = std::env::var("WEBMUX_PORT").unwrap_or_else(|_| "8080".to_string());
    format!("localhost:{}", port)
}

struct Client {
    host: String,
    http: reqwest::Client,
}

#[derive(Debug, thiserror::Error)]
enum WmError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("server error ({status}): {body}")]
    Server { status: u16, body: String },
    #[error("{0}")]
    Usage(String),
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl Client {
    fn new(host: String) -> Self {
        Self {
            host,
            http: reqwest::Client::new(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.host, path)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, WmError> {
        let status = response.status();
        if status.is_client_error() || status.is_server_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(WmError::Server {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    async fn get_json(&self, path: &str) -> Result<serde_json::Value, WmError> {
        let response = Self::check(self.http.get(self.url(path)).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn post_json(
        &self,
        path: &str,
        body: serde_json::Value,
    ) -> Result<serde_json::Value, WmError> {
        let response =
            Self::check(self.http.post(self.url(path)).json(&body).send().await?).await?;
        Ok(response.json().await?)
    }

    async fn delete(&self, path: &str) -> Result<(), WmError> {
        Self::check(self.http.delete(self.url(path)).send().await?).await?;
        Ok(())
    }
}

fn read_stdin() -> Result<String, WmError> {
    let mut buf = String::new();
    std::io::stdin().read_to_string(&mut buf)?;
    Ok(buf)
}

fn absolute(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

async fn cmd_info(client: &Client) -> Result<(), WmError> {
    let info = client.get_json("/api/info").await?;
    println!("server:     localhost:{}", info["port"]);
    println!("work dir:   {}", info["workDir"].as_str().unwrap_or("?"));
    println!("upload dir: {}", info["uploadDir"].as_str().unwrap_or("?"));
    println!("shell:      {}", info["shell"].as_str().unwrap_or("?"));
    println!("sessions:   {}", info["sessionCount"]);
    Ok(())
}

async fn cmd_ls(client: &Client) -> Result<(), WmError> {
    let sessions = client.get_json("/api/sessions").await?;
    let Some(list) = sessions.as_array() else {
        return Ok(());
    };
    if list.is_empty() {
        println!("no sessions");
        return Ok(());
    }
    let current = std::env::var("WEBMUX_SESSION").unwrap_or_default();
    for s in list {
        let id = s["id"].as_str().unwrap_or("?");
        let marker = if id == current { "*" } else { " " };
        let proc = s["currentProcess"].as_str().unwrap_or("");
        println!("{} {:<14} {:<16} {}", marker, id, s["name"].as_str().unwrap_or(""), proc);
    }
    Ok(())
}

async fn cmd_new(client: &Client, name: Option<String>) -> Result<(), WmError> {
    let body = serde_json::json!({"name": name.unwrap_or_default()});
    let session = client.post_json("/api/sessions", body).await?;
    println!(
        "created {} ({})",
        session["id"].as_str().unwrap_or("?"),
        session["name"].as_str().unwrap_or("?")
    );
    Ok(())
}

async fn cmd_upload(client: &Client, files: Vec<PathBuf>) -> Result<(), WmError> {
    let mut form = reqwest::multipart::Form::new();
    for file in &files {
        let path = absolute(file);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "upload".to_string());
        let data = std::fs::read(&path)?;
        form = form.part("files", reqwest::multipart::Part::bytes(data).file_name(name));
    }
    let response = Client::check(
        client
            .http
            .post(client.url("/api/upload"))
            .multipart(form)
            .send()
            .await?,
    )
    .await?;
    let result: serde_json::Value = response.json().await?;
    for path in result["uploaded"].as_array().into_iter().flatten() {
        println!("uploaded {}", path.as_str().unwrap_or("?"));
    }
    Ok(())
}

async fn cmd_scratch(client: &Client, args: Vec<String>) -> Result<(), WmError> {
    match args.first().map(String::as_str) {
        None | Some("get") => {
            let scratch = client.get_json("/api/scratch").await?;
            print!("{}", scratch["text"].as_str().unwrap_or(""));
        }
        Some("clear") => client.delete("/api/scratch").await?,
        Some("-") => {
            let text = read_stdin()?;
            client
                .post_json("/api/scratch", serde_json::json!({"text": text}))
                .await?;
        }
        Some(_) => {
            let text = args.join(" ");
            client
                .post_json("/api/scratch", serde_json::json!({"text": text}))
                .await?;
        }
    }
    Ok(())
}

async fn cmd_mark(client: &Client, args: Vec<String>) -> Result<(), WmError> {
    match args.first().map(String::as_str) {
        None => {
            let marked = client.get_json("/api/marked").await?;
            let files = marked["files"].as_array().cloned().unwrap_or_default();
            if files.is_empty() {
                println!("no files marked");
            }
            for f in files {
                println!("{}", f["path"].as_str().unwrap_or("?"));
            }
        }
        Some("clear") => client.delete("/api/marked").await?,
        Some("unmark") => {
            let file = args.get(1).ok_or_else(|| {
                WmError::Usage("usage: wm mark unmark <file>".to_string())
            })?;
            let path = absolute(Path::new(file));
            client
                .delete(&format!("/api/marked?path={}", path.to_string_lossy()))
                .await?;
        }
        Some(_) => {
            for file in &args {
                let path = absolute(Path::new(file));
                client
                    .post_json(
                        "/api/marked",
                        serde_json::json!({"path": path.to_string_lossy()}),
                    )
                    .await?;
                println!("marked {}", path.display());
            }
        }
    }
    Ok(())
}

async fn cmd_rename(client: &Client, id: &str, name: &str) -> Result<(), WmError> {
    Client::check(
        client
            .http
            .patch(client.url(&format!("/api/sessions/{}", id)))
            .json(&serde_json::json!({"name": name}))
            .send()
            .await?,
    )
    .await?;
    println!("renamed {} to {}", id, name);
    Ok(())
}

async fn cmd_copy(client: &Client, text: Option<String>) -> Result<(), WmError> {
    let text = match text {
        Some(text) => text,
        None => read_stdin()?,
    };
    Client::check(
        client
            .http
            .post(client.url("/api/clipboard"))
            .body(text)
            .send()
            .await?,
    )
    .await?;
    Ok(())
}

async fn cmd_paste(client: &Client) -> Result<(), WmError> {
    let response = Client::check(client.http.get(client.url("/api/clipboard")).send().await?).await?;
    print!("{}", response.text().await?);
    Ok(())
}

fn cmd_init() {
    let bin = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "wm".to_string());
    println!("# webmux shell init");
    println!("_wm_bin=\"{}\"", bin);
    println!("wm() {{");
    println!("  \"$_wm_bin\" \"$@\"");
    println!("}}");
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let client = Client::new(server_host());

    let result = match args.command {
        Command::Info => cmd_info(&client).await,
        Command::Ls => cmd_ls(&client).await,
        Command::New { name } => cmd_new(&client, name).await,
        Command::Close { id } => client.delete(&format!("/api/sessions/{}", id)).await,
        Command::Rename { id, name } => cmd_rename(&client, &id, &name).await,
        Command::Upload { files } => cmd_upload(&client, files).await,
        Command::Scratch { args } => cmd_scratch(&client, args).await,
        Command::Mark { args } => cmd_mark(&client, args).await,
        Command::Copy { text } => cmd_copy(&client, text).await,
        Command::Paste => cmd_paste(&client).await,
        Command::Init => {
            cmd_init();
            Ok(())
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
