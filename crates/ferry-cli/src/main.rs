use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use ferry_core::{
    AddArgs, ClientConfig, Message, MoveArgs, PollArgs, QueueClient, QueueConfig, QueueOperation,
    ReliableQueue, StringCodec,
};
use tracing::info;

#[derive(Parser)]
#[command(name = "ferry", about = "Operator CLI for ferry queues")]
struct Cli {
    /// Path to a ferry.toml configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override the data directory from the configuration
    #[arg(long, global = true)]
    data_dir: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect and manage queues
    #[command(subcommand)]
    Queue(QueueCommands),

    /// Enable or disable queue operations
    #[command(subcommand)]
    Op(OpCommands),

    /// Add a text message to a queue
    Send {
        queue: String,

        /// Message body
        body: String,

        #[arg(long, default_value = "0")]
        priority: i32,

        /// Delay before the message becomes available, in milliseconds
        #[arg(long)]
        delay_ms: Option<u64>,

        /// Message id (generated when omitted)
        #[arg(long)]
        id: Option<String>,
    },

    /// Poll messages from a queue and print them
    Receive {
        queue: String,

        #[arg(long, default_value = "1")]
        count: usize,

        /// How long to wait for messages, in milliseconds
        #[arg(long, default_value = "0")]
        wait_ms: u64,

        /// Acknowledge the received messages
        #[arg(long)]
        ack: bool,
    },

    /// Move messages to another queue (e.g. redrive a dead-letter queue)
    Move {
        /// Source queue
        from: String,

        /// Destination queue
        to: String,

        /// Message ids to move
        #[arg(long, conflicts_with = "count", num_args = 1..)]
        ids: Vec<String>,

        /// Move the first N ready messages
        #[arg(long)]
        count: Option<usize>,
    },

    /// Run one reaper pass over a queue
    Reap { queue: String },
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List configured queues with their sizes
    List,

    /// Show counts, configuration and disabled operations of a queue
    Inspect { name: String },

    /// Show the queue configuration, or update the given fields
    Config {
        name: String,

        #[command(flatten)]
        update: ConfigUpdate,
    },

    /// Delete every message of a queue
    Clear { name: String },
}

#[derive(Args)]
struct ConfigUpdate {
    #[arg(long)]
    size_limit: Option<u64>,

    #[arg(long)]
    message_size_limit: Option<u64>,

    #[arg(long)]
    message_ttl_ms: Option<u64>,

    #[arg(long)]
    visibility_timeout_ms: Option<u64>,

    #[arg(long)]
    delivery_limit: Option<u32>,

    #[arg(long)]
    dedup_window_ms: Option<u64>,

    /// Dead-letter queue name; an empty string removes it
    #[arg(long)]
    dead_letter_queue: Option<String>,
}

impl ConfigUpdate {
    fn is_empty(&self) -> bool {
        self.size_limit.is_none()
            && self.message_size_limit.is_none()
            && self.message_ttl_ms.is_none()
            && self.visibility_timeout_ms.is_none()
            && self.delivery_limit.is_none()
            && self.dedup_window_ms.is_none()
            && self.dead_letter_queue.is_none()
    }

    fn apply(self, mut config: QueueConfig) -> QueueConfig {
        if let Some(v) = self.size_limit {
            config.size_limit = v;
        }
        if let Some(v) = self.message_size_limit {
            config.message_size_limit = v;
        }
        if let Some(v) = self.message_ttl_ms {
            config.message_ttl_ms = v;
        }
        if let Some(v) = self.visibility_timeout_ms {
            config.visibility_timeout_ms = v;
        }
        if let Some(v) = self.delivery_limit {
            config.delivery_limit = v;
        }
        if let Some(v) = self.dedup_window_ms {
            config.dedup_window_ms = v;
        }
        if let Some(dlq) = self.dead_letter_queue {
            config.dead_letter_queue = (!dlq.is_empty()).then_some(dlq);
        }
        config
    }
}

#[derive(Subcommand)]
enum OpCommands {
    /// Re-enable an operation (add, poll, ack, nack, remove, move)
    Enable {
        queue: String,
        operation: QueueOperation,
    },

    /// Disable an operation (add, poll, ack, nack, remove, move)
    Disable {
        queue: String,
        operation: QueueOperation,
    },
}

fn load_config(explicit: Option<&Path>) -> ClientConfig {
    if let Some(path) = explicit {
        return read_config(path);
    }
    for path in ["ferry.toml", "/etc/ferry/ferry.toml"] {
        let path = Path::new(path);
        if path.exists() {
            return read_config(path);
        }
    }
    info!("no config file found, using defaults");
    ClientConfig::default()
}

fn read_config(path: &Path) -> ClientConfig {
    match ClientConfig::from_file(path) {
        Ok(config) => {
            info!(path = %path.display(), "loaded configuration");
            config
        }
        Err(e) => fail(e),
    }
}

fn fail(message: impl std::fmt::Display) -> ! {
    eprintln!("Error: {message}");
    process::exit(1);
}

/// Unwrap an operation result or exit with its error.
fn or_exit<T, E: std::fmt::Display>(result: Result<T, E>) -> T {
    result.unwrap_or_else(|e| fail(e))
}

fn open_queue(client: &QueueClient, name: &str) -> ReliableQueue<String, StringCodec> {
    or_exit(client.queue(name, StringCodec))
}

fn plural(n: usize) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

fn cmd_queue_list(client: &QueueClient) {
    let mut names = or_exit(client.list_queues());
    if names.is_empty() {
        println!("No queues found.");
        return;
    }
    names.sort();

    let name_width = names.iter().map(String::len).max().unwrap_or(4).max(4);
    println!(
        "{:<name_width$}  {:>7}  {:>7}  {:>7}",
        "NAME", "SIZE", "DELAYED", "UNACKED"
    );
    for name in &names {
        let queue = open_queue(client, name);
        println!(
            "{:<name_width$}  {:>7}  {:>7}  {:>7}",
            name,
            or_exit(queue.size()),
            or_exit(queue.count_delayed()),
            or_exit(queue.count_unacknowledged())
        );
    }
}

fn print_config(config: &QueueConfig) {
    let dlq = config.dead_letter_queue.as_deref().unwrap_or("(none)");
    println!("  Size limit:           {}", config.size_limit);
    println!("  Message size limit:   {}", config.message_size_limit);
    println!("  Message TTL (ms):     {}", config.message_ttl_ms);
    println!("  Visibility (ms):      {}", config.visibility_timeout_ms);
    println!("  Delivery limit:       {}", config.delivery_limit);
    println!("  Dedup window (ms):    {}", config.dedup_window_ms);
    println!("  Dead-letter queue:    {dlq}");
}

fn cmd_queue_inspect(client: &QueueClient, name: &str) {
    let queue = open_queue(client, name);
    println!("Queue: {name}");
    println!("  Size:                 {}", or_exit(queue.size()));
    println!("  Delayed:              {}", or_exit(queue.count_delayed()));
    println!("  Unacknowledged:       {}", or_exit(queue.count_unacknowledged()));

    match or_exit(queue.config()) {
        Some(config) => print_config(&config),
        None => {
            println!("  (default configuration)");
            print_config(&QueueConfig::default());
        }
    }

    let disabled = or_exit(queue.disabled_operations());
    if !disabled.is_empty() {
        let names: Vec<&str> = disabled.iter().map(QueueOperation::as_str).collect();
        println!("  Disabled operations:  {}", names.join(", "));
    }
    let sources = or_exit(queue.dead_letter_queue_sources());
    if !sources.is_empty() {
        println!("  Dead letters from:    {}", sources.join(", "));
    }
}

fn cmd_queue_config(client: &QueueClient, name: &str, update: ConfigUpdate) {
    let queue = open_queue(client, name);
    let current = or_exit(queue.config());
    if update.is_empty() {
        println!("Queue: {name}");
        print_config(&current.unwrap_or_default());
        return;
    }
    let config = update.apply(current.unwrap_or_default());
    or_exit(queue.set_config(config));
    println!("Updated configuration of \"{name}\"");
}

fn cmd_queue_clear(client: &QueueClient, name: &str) {
    let queue = open_queue(client, name);
    if or_exit(queue.clear()) {
        println!("Cleared queue \"{name}\"");
    } else {
        println!("Queue \"{name}\" was already empty");
    }
}

fn cmd_op(client: &QueueClient, name: &str, operation: QueueOperation, enable: bool) {
    let queue = open_queue(client, name);
    let (changed, verb) = if enable {
        (or_exit(queue.enable_operation(operation)), "enabled")
    } else {
        (or_exit(queue.disable_operation(operation)), "disabled")
    };
    if changed {
        println!("Operation {operation} {verb} on \"{name}\"");
    } else {
        println!("Operation {operation} was already {verb} on \"{name}\"");
    }
}

fn cmd_send(
    client: &QueueClient,
    name: &str,
    body: String,
    priority: i32,
    delay_ms: Option<u64>,
    id: Option<String>,
) {
    let queue = open_queue(client, name);
    let mut args = AddArgs::new(body).priority(priority);
    if let Some(ms) = delay_ms {
        args = args.delay(Duration::from_millis(ms));
    }
    if let Some(id) = id {
        args = args.id(id);
    }
    match or_exit(queue.add(args)) {
        Some(msg) => println!("{}", msg.id),
        None => fail(format!(
            "message was not added to \"{name}\" (duplicate, too large, id taken or queue full)"
        )),
    }
}

fn print_message(msg: &Message<String>) {
    println!(
        "{}\tdeliveries={}\tpriority={}\t{}",
        msg.id, msg.delivery_count, msg.priority, msg.value
    );
}

async fn cmd_receive(client: &QueueClient, name: &str, count: usize, wait_ms: u64, ack: bool) {
    let queue = open_queue(client, name);
    let args = PollArgs::new(count).wait(Duration::from_millis(wait_ms));
    let messages = or_exit(queue.poll(args).await);
    if messages.is_empty() {
        println!("No messages available.");
        return;
    }
    for msg in &messages {
        print_message(msg);
    }
    if ack {
        let ids: Vec<String> = messages.iter().map(|m| m.id.clone()).collect();
        let acked = or_exit(queue.acknowledge_many(&ids));
        println!("Acknowledged {acked} message{}", plural(acked));
    }
}

fn cmd_move(client: &QueueClient, from: &str, to: &str, ids: Vec<String>, count: Option<usize>) {
    let args = match count {
        Some(count) => MoveArgs::count(to, count),
        None if !ids.is_empty() => MoveArgs::ids(to, ids),
        None => fail("pass --ids or --count"),
    };
    let queue = open_queue(client, from);
    let moved = or_exit(queue.move_to(args));
    println!(
        "Moved {moved} message{} from \"{from}\" to \"{to}\"",
        plural(moved)
    );
}

fn cmd_reap(client: &QueueClient, name: &str) {
    let queue = open_queue(client, name);
    let stats = or_exit(queue.reap_now());
    println!("Reaped \"{name}\"");
    println!("  Promoted:             {}", stats.promoted);
    println!("  Reclaimed:            {}", stats.reclaimed);
    println!("  Dead-lettered:        {}", stats.dead_lettered);
    println!("  Expired:              {}", stats.expired);
    println!("  Dedup entries pruned: {}", stats.dedup_pruned);
}

#[tokio::main]
async fn main() {
    ferry_core::telemetry::init_tracing("warn");

    let cli = Cli::parse();
    let mut config = load_config(cli.config.as_deref());
    if let Some(dir) = cli.data_dir {
        config.storage.data_dir = dir;
    }
    let client = or_exit(QueueClient::open(config));

    match cli.command {
        Commands::Queue(cmd) => match cmd {
            QueueCommands::List => cmd_queue_list(&client),
            QueueCommands::Inspect { name } => cmd_queue_inspect(&client, &name),
            QueueCommands::Config { name, update } => cmd_queue_config(&client, &name, update),
            QueueCommands::Clear { name } => cmd_queue_clear(&client, &name),
        },
        Commands::Op(cmd) => match cmd {
            OpCommands::Enable { queue, operation } => cmd_op(&client, &queue, operation, true),
            OpCommands::Disable { queue, operation } => cmd_op(&client, &queue, operation, false),
        },
        Commands::Send {
            queue,
            body,
            priority,
            delay_ms,
            id,
        } => cmd_send(&client, &queue, body, priority, delay_ms, id),
        Commands::Receive {
            queue,
            count,
            wait_ms,
            ack,
        } => cmd_receive(&client, &queue, count, wait_ms, ack).await,
        Commands::Move {
            from,
            to,
            ids,
            count,
        } => cmd_move(&client, &from, &to, ids, count),
        Commands::Reap { queue } => cmd_reap(&client, &queue),
    }

    or_exit(client.shutdown());
}
