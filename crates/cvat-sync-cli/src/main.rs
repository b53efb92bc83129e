// SPDX-License-Identifier: Apache-2.0
// Copyright © 2025 Au-Zone Technologies. All Rights Reserved.

use clap::{Parser, Subcommand};
use cvat_sync::{
    AnnotationSession, Client, ConnectionConfig, Error, Progress, SampleCollection, TaskId,
    annotate::{LabelSchema, UploadOptions, download_annotations, upload_samples},
    cvat::{CvatReader, TaskLabels},
};
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Password, PasswordDisplayMode};
use std::path::PathBuf;
use tokio::{sync::mpsc, task::JoinHandle};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// CVAT server host name, without protocol
    #[clap(long, env = "CVAT_URL")]
    url: Option<String>,

    /// CVAT server port
    #[clap(long, env = "CVAT_PORT")]
    port: Option<u16>,

    /// Connect with plain HTTP instead of HTTPS
    #[clap(long)]
    http: bool,

    /// CVAT username
    #[clap(long, env = "CVAT_USERNAME")]
    username: Option<String>,

    /// CVAT password, prompted for when a username is given without one
    #[clap(long, env = "CVAT_PASSWORD")]
    password: Option<String>,

    /// Client Command
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, PartialEq, Clone, Debug)]
enum Command {
    /// List the users of the CVAT server.
    Users,
    /// Show the labels of a task with their class and attribute ids.
    Task {
        /// Task ID
        task_id: u64,
    },
    /// Delete one or more tasks.  Tasks that no longer exist are skipped.
    DeleteTask {
        /// Task IDs
        #[clap(required = true)]
        task_ids: Vec<u64>,
    },
    /// Upload samples to CVAT for annotation.  One task is created per label
    /// field, or per label field and video for video samples.  The samples
    /// file is rewritten with the sample ids and media metadata used for the
    /// upload so that the annotations can later be merged back into it.
    Annotate {
        /// Samples JSON file
        #[clap(long)]
        samples: PathBuf,

        /// Label schema JSON file mapping field names to their type, classes
        /// and attributes
        #[clap(long)]
        schema: PathBuf,

        /// Where to save the annotation session
        #[clap(long)]
        output: PathBuf,

        /// Prefix of the task names
        #[clap(long)]
        prefix: Option<String>,

        /// Image quality used by CVAT for the task data, from 0 to 100
        #[clap(long)]
        image_quality: Option<u8>,

        /// Number of frames per job
        #[clap(long)]
        segment_size: Option<u32>,

        /// User assigned to every task
        #[clap(long)]
        task_assignee: Option<String>,

        /// Users assigned to the jobs, in order, separated by commas
        #[clap(long, value_delimiter = ',')]
        job_assignees: Vec<String>,

        /// Users reviewing the jobs, in order, separated by commas
        #[clap(long, value_delimiter = ',')]
        job_reviewers: Vec<String>,
    },
    /// Download the annotations of a saved annotation session.
    Download {
        /// Annotation session file written by the annotate command
        #[clap(long)]
        session: PathBuf,

        /// Output file.  When samples are given this receives the samples
        /// with the annotations merged in, otherwise the raw results.
        #[clap(long)]
        output: PathBuf,

        /// Samples JSON file to merge the annotations into
        #[clap(long)]
        samples: Option<PathBuf>,

        /// Delete the tasks once their annotations are downloaded
        #[clap(long)]
        delete_tasks: bool,
    },
    /// Summarize a CVAT XML document.  Does not contact the server.
    Inspect {
        /// CVAT XML file
        path: PathBuf,

        /// Read the document as a video (track) document
        #[clap(long)]
        video: bool,
    },
}

fn connection_config(args: &Args) -> Result<ConnectionConfig, Error> {
    let mut config = ConnectionConfig::from_env()?;
    if let Some(url) = &args.url {
        config.url = url.clone();
    }
    if args.port.is_some() {
        config.port = args.port;
    }
    if args.http {
        config.use_tls = false;
    }

    if let Some(username) = &args.username {
        let password = match &args.password {
            Some(password) => password.clone(),
            None => Password::new("CVAT Password:")
                .with_display_mode(PasswordDisplayMode::Masked)
                .without_confirmation()
                .prompt()
                .map_err(|err| Error::InvalidParameters(err.to_string()))?,
        };
        config = config.with_credentials(username, password);
    }

    Ok(config)
}

fn progress_bar(label: &str) -> (mpsc::Sender<Progress>, JoinHandle<()>) {
    let bar = ProgressBar::new(0);
    let template = format!(
        "[{{elapsed_precise}} ETA: {{eta}}] {}: {{wide_bar:.yellow}} {{human_pos}}/{{human_len}}",
        label
    );
    match ProgressStyle::with_template(&template) {
        Ok(style) => bar.set_style(style.progress_chars("█▇▆▅▄▃▂▁  ")),
        Err(err) => log::debug!("default progress style: {}", err),
    }

    let (tx, mut rx) = mpsc::channel::<Progress>(1);
    let handle = tokio::spawn(async move {
        while let Some(Progress { current, total }) = rx.recv().await {
            bar.set_length(total as u64);
            bar.set_position(current as u64);
        }
        bar.finish_with_message("done");
    });

    (tx, handle)
}

async fn handle_users(client: &Client) -> Result<(), Error> {
    for user in client.users().await? {
        println!("[{}] {}", user.id, user.username);
    }
    Ok(())
}

async fn handle_task(client: &Client, task_id: TaskId) -> Result<(), Error> {
    let task = client.task(task_id).await?;
    println!("[{}] {}", task.id, task.name);
    if task.is_video() {
        println!("media: video");
    }
    for label in &task.labels {
        println!("    [{}] {}", label.id, label.name);
        for attribute in &label.attributes {
            println!("        [{}] {}", attribute.id, attribute.name);
        }
    }
    Ok(())
}

async fn handle_delete_task(client: &Client, task_ids: Vec<u64>) -> Result<(), Error> {
    let task_ids: Vec<TaskId> = task_ids.into_iter().map(TaskId::from).collect();
    client.delete_tasks(&task_ids).await?;
    println!("Deleted {} task(s)", task_ids.len());
    Ok(())
}

#[allow(clippy::too_many_arguments)]
async fn handle_annotate(
    client: &Client,
    samples_path: PathBuf,
    schema_path: PathBuf,
    output: PathBuf,
    prefix: Option<String>,
    image_quality: Option<u8>,
    segment_size: Option<u32>,
    task_assignee: Option<String>,
    job_assignees: Vec<String>,
    job_reviewers: Vec<String>,
) -> Result<(), Error> {
    let mut samples: SampleCollection =
        serde_json::from_str(&std::fs::read_to_string(&samples_path)?)?;
    let schema: LabelSchema = serde_json::from_str(&std::fs::read_to_string(&schema_path)?)?;

    let mut options = UploadOptions {
        segment_size,
        task_assignee,
        job_assignees,
        job_reviewers,
        ..Default::default()
    };
    if let Some(prefix) = prefix {
        options.task_name_prefix = prefix;
    }
    if let Some(quality) = image_quality {
        options.image_quality = quality;
    }

    let (tx, bar) = progress_bar("Creating Tasks");
    let session = upload_samples(client, &mut samples, schema, &options, Some(tx)).await;
    let _ = bar.await;
    let session = session?;

    session.save(&output)?;
    std::fs::write(&samples_path, serde_json::to_string_pretty(&samples)?)?;
    log::info!("Saved annotation session to {:?}", output);

    for info in session.label_fields_info() {
        let task_ids = info
            .task_ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        println!("{} ({}): tasks {}", info.field, info.label_type, task_ids);
    }
    if let Some(url) = session.editor_url(client.config()) {
        println!("Open {} to start annotating", url);
    }

    Ok(())
}

async fn handle_download(
    client: &Client,
    session_path: PathBuf,
    output: PathBuf,
    samples_path: Option<PathBuf>,
    delete_tasks: bool,
) -> Result<(), Error> {
    let session = AnnotationSession::load(&session_path)?;
    let results = download_annotations(client, &session, delete_tasks).await?;

    for (field, kinds) in &results.additional_results {
        for kind in kinds.keys() {
            log::warn!(
                "Field {} received {} annotations which were kept separately",
                field,
                kind
            );
        }
    }

    let json = match samples_path {
        Some(samples_path) => {
            let mut samples: SampleCollection =
                serde_json::from_str(&std::fs::read_to_string(&samples_path)?)?;
            results.merge_into(&mut samples);
            serde_json::to_string_pretty(&samples)?
        }
        None => serde_json::to_string_pretty(&results)?,
    };
    std::fs::write(&output, json)?;
    println!("Saved annotations to {:?}", output);

    Ok(())
}

fn print_labels(labels: &TaskLabels) {
    println!("labels:");
    for label in labels.labels() {
        println!("    {}", label.name);
        for attribute in &label.attributes {
            if attribute.categories.is_empty() {
                println!("        {}", attribute.name);
            } else {
                println!(
                    "        {} [{}]",
                    attribute.name,
                    attribute.categories.join(", ")
                );
            }
        }
    }
}

fn handle_inspect(path: PathBuf, video: bool) -> Result<(), Error> {
    let reader = CvatReader::new();
    if video {
        let document = reader.read_video_xml(&path)?;
        print_labels(&document.info.task_labels);
        if let Some((width, height)) = document.frame_size {
            println!("frame size: {}x{}", width, height);
        }
        println!("{} tracks", document.tracks.len());
        println!("{} labeled frames", document.frames().len());
    } else {
        let document = reader.read_image_xml(&path)?;
        print_labels(&document.info.task_labels);
        let annotations: usize = document
            .images
            .iter()
            .map(|image| image.annotations().count())
            .sum();
        println!("{} images", document.images.len());
        println!("{} annotations", annotations);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();

    // Offline commands never connect.
    if let Command::Inspect { path, video } = &args.cmd {
        return handle_inspect(path.clone(), *video);
    }

    let client = Client::connect(connection_config(&args)?).await?;

    match args.cmd {
        Command::Inspect { .. } => Ok(()),
        Command::Users => handle_users(&client).await,
        Command::Task { task_id } => handle_task(&client, TaskId::from(task_id)).await,
        Command::DeleteTask { task_ids } => handle_delete_task(&client, task_ids).await,
        Command::Annotate {
            samples,
            schema,
            output,
            prefix,
            image_quality,
            segment_size,
            task_assignee,
            job_assignees,
            job_reviewers,
        } => {
            handle_annotate(
                &client,
                samples,
                schema,
                output,
                prefix,
                image_quality,
                segment_size,
                task_assignee,
                job_assignees,
                job_reviewers,
            )
            .await
        }
        Command::Download {
            session,
            output,
            samples,
            delete_tasks,
        } => handle_download(&client, session, output, samples, delete_tasks).await,
    }
}
