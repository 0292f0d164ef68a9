use clap::{Args, Subcommand, ValueEnum};

use tablesync::Config;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values (credentials masked)
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl ConfigCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                let sanitized = config.sync_config()?.sanitized();
                match format {
                    OutputFormat::Json => {
                        println!("{}", serde_json::to_string_pretty(&sanitized)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("remote_url:       {}", sanitized.remote_url);
                        println!("remote_key:       {}", sanitized.remote_key);
                        println!("local_url:        {}", sanitized.local_url);
                        println!("tick_interval_ms: {}", sanitized.tick_interval_ms);
                        println!("read_only:        {}", sanitized.read_only);
                        println!("push_batch_size:  {}", sanitized.push_batch_size);
                        println!("port:             {}", config.port);
                        println!("auto_start:       {}", config.auto_start);
                        println!();

                        println!("tables:");
                        for table in &sanitized.tables {
                            println!(
                                "  {} (key: {}, timestamp: {})",
                                table.name, table.primary_key, table.timestamp_column
                            );
                        }
                    }
                }
                Ok(())
            }
        }
    }
}
