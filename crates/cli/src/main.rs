use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use cloud_drive_core::config::{ClientConfig, default_config_dir, load_config};
use cloud_drive_core::{
    APP_NAME, AuthContext, FileInfo, FileList, FileRef, HttpApiClient, ShareInfo, ShareRequest,
    UploadManager, UploadRegistry, UploadStatus, UploadTask, Uploader, format_file_size,
    generate_share_password,
};
use serde::Serialize;
use tokio::task::JoinSet;

#[derive(Parser)]
#[command(name = "clouddrive")]
#[command(about = "CloudDrive command line client", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    /// Session token; falls back to CLOUDDRIVE_TOKEN, then the config file.
    #[arg(long, global = true)]
    token: Option<String>,

    #[arg(long, global = true)]
    base_url: Option<String>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    Upload {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        parent_id: Option<i64>,
        /// Use the one-shot endpoint without server-side progress.
        #[arg(long)]
        no_progress: bool,
    },
    Ls {
        #[arg(long)]
        parent_id: Option<i64>,
    },
    Search {
        keyword: String,
    },
    Rename {
        id: i64,
        name: String,
    },
    Rm {
        id: i64,
    },
    Download {
        id: i64,
        #[arg(long)]
        out: PathBuf,
    },
    Share {
        #[command(subcommand)]
        cmd: ShareCmd,
    },
}

#[derive(Subcommand)]
enum ShareCmd {
    Create {
        file_id: i64,
        #[arg(long, default_value_t = 7)]
        days: i64,
        #[arg(long, conflicts_with = "random_password")]
        password: Option<String>,
        #[arg(long)]
        random_password: bool,
    },
    List,
    Cancel {
        code: String,
    },
    Open {
        code: String,
        #[arg(long)]
        password: Option<String>,
        /// Access token from an earlier password check.
        #[arg(long, conflicts_with = "password")]
        access_token: Option<String>,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[derive(Debug, Serialize)]
struct CliError {
    code: &'static str,
    message: String,
    details: serde_json::Value,
    retryable: bool,
}

impl CliError {
    fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: false,
        }
    }

    fn retryable(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: serde_json::json!({}),
            retryable: true,
        }
    }

    fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    cloud_drive_core::logging::init_logging(cli.json);
    let code = match run(cli).await {
        Ok(()) => 0,
        Err(e) => {
            emit_error(&e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<(), CliError> {
    let config_dir = cli.config_dir.clone().unwrap_or_else(default_config_dir);
    let config = resolve_config(&config_dir, &cli)?;
    let auth = match &config.token {
        Some(token) => AuthContext::with_token(token.clone()),
        None => AuthContext::new(),
    };
    let client = HttpApiClient::new(config.base_url.clone(), auth);
    tracing::debug!(
        event = "cli.start",
        app = APP_NAME,
        base_url = %client.base_url(),
        authenticated = client.auth().is_authenticated(),
        "cli.start"
    );

    match cli.cmd {
        Command::Upload {
            paths,
            parent_id,
            no_progress,
        } => upload_run(&client, &config, paths, parent_id, no_progress, cli.json).await,
        Command::Ls { parent_id } => {
            let files = client.list_files(parent_id).await.map_err(map_core_err)?;
            print_files(&files, cli.json);
            Ok(())
        }
        Command::Search { keyword } => {
            let files = client.search_files(&keyword).await.map_err(map_core_err)?;
            print_files(&files, cli.json);
            Ok(())
        }
        Command::Rename { id, name } => {
            client.rename_file(id, &name).await.map_err(map_core_err)?;
            print_ok(cli.json);
            Ok(())
        }
        Command::Rm { id } => {
            client.delete_file(id).await.map_err(map_core_err)?;
            print_ok(cli.json);
            Ok(())
        }
        Command::Download { id, out } => {
            let bytes = client.download_file(id).await.map_err(map_core_err)?;
            write_output(&out, &bytes, cli.json)
        }
        Command::Share { cmd } => share_run(&client, cmd, cli.json).await,
    }
}

fn resolve_config(config_dir: &Path, cli: &Cli) -> Result<ClientConfig, CliError> {
    let mut config = load_config(config_dir).map_err(map_core_err)?;
    if let Some(base_url) = &cli.base_url {
        config.base_url = base_url.trim_end_matches('/').to_string();
    }
    let token = cli
        .token
        .clone()
        .or_else(|| std::env::var("CLOUDDRIVE_TOKEN").ok());
    let config = config.with_token_override(token);
    config.validate().map_err(map_core_err)?;
    Ok(config)
}

async fn upload_run(
    client: &HttpApiClient,
    config: &ClientConfig,
    paths: Vec<PathBuf>,
    parent_id: Option<i64>,
    no_progress: bool,
    json: bool,
) -> Result<(), CliError> {
    if !client.auth().is_authenticated() {
        return Err(CliError::new("auth.missing", "not signed in (no token)"));
    }

    let mut files = Vec::with_capacity(paths.len());
    for path in &paths {
        files.push(FileRef::open(path).await.map_err(map_core_err)?);
    }

    let registry = UploadRegistry::new(config.upload.completed_ttl());
    let refresher = Arc::new(FileList::new(client.clone(), parent_id));
    let manager = Arc::new(
        UploadManager::new(
            Uploader::new(client.clone(), config.upload.poll_timing()),
            registry,
            refresher,
        )
        .with_progress_tracking(config.upload.track_progress && !no_progress),
    );

    let rx = manager.subscribe();
    let printer = tokio::spawn(async move {
        if json {
            print_progress(rx, true, std::io::stdout()).await;
        } else {
            print_progress(rx, false, std::io::stderr()).await;
        }
    });

    let mut set = JoinSet::new();
    for (index, file) in files.into_iter().enumerate() {
        let manager = Arc::clone(&manager);
        set.spawn(async move { (index, manager.upload(file, parent_id).await) });
    }
    let mut finished: Vec<(usize, UploadTask)> = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok((index, Some(task))) => finished.push((index, task)),
            Ok((_, None)) => {}
            Err(e) => return Err(CliError::new("upload.aborted", e.to_string())),
        }
    }
    // Dropping the manager closes the task channel once the printer has
    // seen the last snapshot.
    drop(manager);
    let _ = printer.await;
    finished.sort_by_key(|(index, _)| *index);

    let failed = finished
        .iter()
        .filter(|(_, t)| t.status == UploadStatus::Error)
        .count();
    if json {
        let uploads: Vec<_> = finished.iter().map(|(_, t)| task_json(t)).collect();
        println!("{}", serde_json::json!({ "uploads": uploads }));
    } else {
        for (_, t) in &finished {
            match &t.error {
                Some(detail) => println!("{}\terror: {detail}", t.file.name()),
                None => println!(
                    "{}\t{}\tcompleted",
                    t.file.name(),
                    format_file_size(t.file.size())
                ),
            }
        }
    }

    if failed > 0 {
        return Err(CliError::new(
            "upload.failed",
            format!("{failed} of {} uploads failed", finished.len()),
        ));
    }
    Ok(())
}

/// Writes one line per task state change until the registry goes away.
async fn print_progress<W: Write>(
    mut rx: tokio::sync::watch::Receiver<Vec<UploadTask>>,
    json: bool,
    mut out: W,
) -> W {
    let mut last: HashMap<String, (u8, UploadStatus)> = HashMap::new();
    while rx.changed().await.is_ok() {
        let tasks = rx.borrow_and_update().clone();
        for t in tasks {
            let state = (t.progress, t.status);
            if last.get(&t.id) == Some(&state) {
                continue;
            }
            last.insert(t.id.clone(), state);
            let _ = if json {
                let mut line = task_json(&t);
                line["type"] = serde_json::json!("upload.progress");
                writeln!(out, "{line}")
            } else {
                writeln!(
                    out,
                    "{}: {}% ({})",
                    t.file.name(),
                    t.progress,
                    status_label(t.status)
                )
            };
        }
    }
    out
}

fn task_json(t: &UploadTask) -> serde_json::Value {
    serde_json::json!({
        "taskId": t.id,
        "file": t.file.name(),
        "size": t.file.size(),
        "progress": t.progress,
        "status": t.status,
        "error": t.error,
    })
}

fn status_label(status: UploadStatus) -> &'static str {
    match status {
        UploadStatus::Uploading => "uploading",
        UploadStatus::Completed => "completed",
        UploadStatus::Error => "error",
    }
}

async fn share_run(client: &HttpApiClient, cmd: ShareCmd, json: bool) -> Result<(), CliError> {
    match cmd {
        ShareCmd::Create {
            file_id,
            days,
            password,
            random_password,
        } => {
            if days <= 0 {
                return Err(CliError::new("input.invalid", "--days must be positive"));
            }
            let password = if random_password {
                Some(generate_share_password().map_err(map_core_err)?)
            } else {
                password
            };
            let expire_time = chrono::Local::now().naive_local() + chrono::Duration::days(days);
            let request =
                ShareRequest::new(file_id, expire_time, password.clone()).map_err(map_core_err)?;
            let mut share = client.create_share(&request).await.map_err(map_core_err)?;
            if share.password.is_none() {
                share.password = password;
            }
            print_share(&share, json);
            Ok(())
        }
        ShareCmd::List => {
            let shares = client.list_shares().await.map_err(map_core_err)?;
            if json {
                println!("{}", serde_json::json!({ "shares": shares }));
            } else {
                for s in &shares {
                    println!(
                        "{}\t{}\t{}\tvisits={}{}",
                        s.share_code,
                        s.filename,
                        s.expire_time.as_deref().unwrap_or("-"),
                        s.visit_count,
                        if s.is_expired { "\texpired" } else { "" }
                    );
                }
            }
            Ok(())
        }
        ShareCmd::Cancel { code } => {
            client.cancel_share(&code).await.map_err(map_core_err)?;
            print_ok(json);
            Ok(())
        }
        ShareCmd::Open {
            code,
            password,
            access_token,
            out,
        } => {
            let token = match (password, access_token) {
                (Some(password), _) => client
                    .verify_share(&code, &password)
                    .await
                    .map_err(map_core_err)?
                    .token
                    .ok_or_else(|| {
                        CliError::new("share.unverified", "server returned no access token")
                    })?,
                (None, Some(token)) => token,
                (None, None) => {
                    return Err(CliError::new(
                        "input.invalid",
                        "either --password or --access-token is required",
                    ));
                }
            };
            let mut share = client.open_share(&code, &token).await.map_err(map_core_err)?;
            if share.token.is_none() {
                share.token = Some(token.clone());
            }
            match out {
                Some(out) => {
                    let bytes = client
                        .download_shared_file(&code, &token)
                        .await
                        .map_err(map_core_err)?;
                    write_output(&out, &bytes, json)
                }
                None => {
                    print_share(&share, json);
                    Ok(())
                }
            }
        }
    }
}

fn print_files(files: &[FileInfo], json: bool) {
    if json {
        println!("{}", serde_json::json!({ "files": files }));
        return;
    }
    for f in files {
        let size = if f.is_folder {
            "-".to_string()
        } else {
            format_file_size(f.file_size)
        };
        let kind = if f.is_folder { "dir" } else { "file" };
        println!("{:>6}  {kind:<4}  {size:>10}  {}", f.id, f.filename);
    }
}

fn print_share(share: &ShareInfo, json: bool) {
    if json {
        println!("{}", serde_json::json!({ "share": share }));
        return;
    }
    println!("shareCode={}", share.share_code);
    println!("file={} ({})", share.filename, format_file_size(share.file_size));
    if let Some(expire_time) = &share.expire_time {
        println!("expireTime={expire_time}");
    }
    if let Some(password) = &share.password {
        println!("password={password}");
    }
    if let Some(token) = &share.token {
        println!("accessToken={token}");
    }
}

fn print_ok(json: bool) {
    if json {
        println!("{}", serde_json::json!({ "ok": true }));
    } else {
        println!("ok");
    }
}

fn write_output(out: &Path, bytes: &[u8], json: bool) -> Result<(), CliError> {
    std::fs::write(out, bytes).map_err(|e| {
        CliError::new("io.write_failed", format!("write {} failed: {e}", out.display()))
    })?;
    if json {
        println!(
            "{}",
            serde_json::json!({ "path": out.display().to_string(), "bytes": bytes.len() })
        );
    } else {
        println!("{}\t{}", out.display(), format_file_size(bytes.len() as u64));
    }
    Ok(())
}

fn map_core_err(e: cloud_drive_core::Error) -> CliError {
    match e {
        cloud_drive_core::Error::InvalidConfig { message } => {
            CliError::new("config.invalid", message)
        }
        cloud_drive_core::Error::InvalidInput { message } => CliError::new("input.invalid", message),
        cloud_drive_core::Error::Transport { message } => {
            CliError::retryable("api.unavailable", message)
        }
        e @ cloud_drive_core::Error::MalformedResponse { .. } => {
            CliError::retryable("api.malformed", e.to_string())
        }
        cloud_drive_core::Error::Api { code: 401, message } => {
            CliError::new("auth.unauthorized", message)
        }
        cloud_drive_core::Error::Api { code, message } => {
            CliError::new("api.rejected", message).with_details(serde_json::json!({ "code": code }))
        }
        other => CliError::new("unknown", other.to_string()),
    }
}

fn emit_error(e: &CliError) {
    let json = serde_json::to_string(e).unwrap_or_else(|_| {
        "{\"code\":\"unknown\",\"message\":\"json encode failed\",\"details\":{},\"retryable\":false}"
            .to_string()
    });
    let _ = writeln!(std::io::stderr(), "{json}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn progress_printer_writes_the_final_state() {
        let registry = UploadRegistry::default();
        let rx = registry.subscribe();
        let id = registry.create(FileRef::from_bytes("a.txt", vec![1, 2, 3]));
        registry.set_progress(&id, 40);
        registry.mark_completed(&id);

        let printer = tokio::spawn(print_progress(rx, false, Vec::new()));
        drop(registry);
        let out = String::from_utf8(printer.await.unwrap()).unwrap();

        assert_eq!(out.lines().last(), Some("a.txt: 100% (completed)"));
    }

    #[tokio::test]
    async fn progress_printer_emits_ndjson() {
        let registry = UploadRegistry::default();
        let rx = registry.subscribe();
        let id = registry.create(FileRef::from_bytes("b.bin", vec![0; 8]));
        registry.mark_failed(&id, "quota exceeded");
        drop(registry);

        let out = String::from_utf8(print_progress(rx, true, Vec::new()).await).unwrap();
        let line: serde_json::Value = serde_json::from_str(out.lines().last().unwrap()).unwrap();

        assert_eq!(line["type"], "upload.progress");
        assert_eq!(line["status"], "error");
        assert_eq!(line["error"], "quota exceeded");
    }
}
