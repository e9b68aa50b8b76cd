use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate, NaiveTime, TimeZone, Utc};
use clap::Subcommand;
use pillbox_core::alarm::{ChainStatus, SystemClock};
use pillbox_core::{
    AlarmAction as Action, AlarmCommands, AlarmScheduler, Config, DaySet, FiringHandler,
    HandleOutcome, InMemoryTimerService, MedicineId, OccurrenceCalculator, Schedule,
    ScheduleAlarmArgs, ScheduleStore, TimeOfDay,
};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::host::{TerminalNotifications, TerminalPresenter};

#[derive(Subcommand)]
pub enum AlarmAction {
    /// Save a recurring schedule (armed by `alarm run`)
    Schedule {
        /// Medicine ID
        #[arg(long)]
        id: String,
        /// Local time of day, HH:MM
        #[arg(long)]
        time: String,
        /// Comma-separated weekdays, e.g. "mon,wed,fri"
        #[arg(long)]
        days: String,
        /// Start (RFC 3339 or YYYY-MM-DD); defaults to now
        #[arg(long)]
        start: Option<String>,
        /// Inclusive end (RFC 3339 or YYYY-MM-DD); open-ended if omitted
        #[arg(long)]
        end: Option<String>,
        /// Text shown with the alert
        #[arg(long, default_value = "")]
        payload: String,
    },
    /// Remove a schedule
    Cancel {
        /// Medicine ID
        id: String,
    },
    /// List stored schedules with their next occurrence
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Preview upcoming occurrences
    Next {
        /// Medicine ID
        id: String,
        /// Number of occurrences
        #[arg(long, default_value_t = 5)]
        count: usize,
    },
    /// Run the alarm daemon in the foreground
    Run,
}

pub fn run(action: AlarmAction) -> Result<(), Box<dyn Error>> {
    let store = ScheduleStore::open()?;
    let calc = OccurrenceCalculator::local();

    match action {
        AlarmAction::Schedule {
            id,
            time,
            days,
            start,
            end,
            payload,
        } => {
            let start_date = match start {
                Some(s) => parse_instant(&s, false)?,
                None => Utc::now(),
            };
            let end_date = end.map(|s| parse_instant(&s, true)).transpose()?;
            let schedule = Schedule::new(
                MedicineId::new(id)?,
                time.parse::<TimeOfDay>()?,
                days.parse::<DaySet>()?,
                start_date,
                end_date,
                payload,
            )?;
            let next = calc.next(Utc::now(), &schedule);
            store.upsert(schedule.clone())?;
            let out = json!({
                "medicineId": schedule.medicine_id,
                "status": if next.is_some() { "scheduled" } else { "exhausted" },
                "nextFire": next.map(|t| t.with_timezone(&Local).to_rfc3339()),
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        AlarmAction::Cancel { id } => {
            let id = MedicineId::new(id)?;
            if store.remove(&id)? {
                println!("Cancelled {id}");
            } else {
                println!("{id} was not scheduled");
            }
        }
        AlarmAction::List { json } => {
            let now = Utc::now();
            let schedules = store.load()?;
            if json {
                let rows: Vec<_> = schedules
                    .iter()
                    .map(|s| {
                        json!({
                            "schedule": s,
                            "nextFire": calc.next(now, s).map(|t| t.to_rfc3339()),
                        })
                    })
                    .collect();
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else if schedules.is_empty() {
                println!("No schedules");
            } else {
                for s in &schedules {
                    let next = calc
                        .next(now, s)
                        .map(|t| t.with_timezone(&Local).format("%a %Y-%m-%d %H:%M").to_string())
                        .unwrap_or_else(|| "exhausted".into());
                    println!(
                        "{:<16} {} {:<28} next: {}",
                        s.medicine_id, s.time_of_day, s.selected_days, next
                    );
                }
            }
        }
        AlarmAction::Next { id, count } => {
            let id = MedicineId::new(id)?;
            let schedule = store
                .get(&id)?
                .ok_or_else(|| format!("no schedule for {id}"))?;
            let mut any = false;
            for t in calc.upcoming(Utc::now(), &schedule).take(count) {
                any = true;
                println!("{}", t.with_timezone(&Local).format("%a %Y-%m-%d %H:%M %:z"));
            }
            if !any {
                println!("Schedule exhausted");
            }
        }
        AlarmAction::Run => {
            let config = Config::load()?;
            let runtime = tokio::runtime::Runtime::new()?;
            let result = runtime.block_on(daemon(config, store));
            // The stdin reader may still be parked on a blocking read.
            runtime.shutdown_background();
            result?;
        }
    }
    Ok(())
}

/// RFC 3339, or a bare local date (start or end of that day).
fn parse_instant(s: &str, end_of_day: bool) -> Result<DateTime<Utc>, Box<dyn Error>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .map_err(|_| format!("invalid date '{s}', expected RFC 3339 or YYYY-MM-DD"))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .ok_or("invalid time")?;
    Local
        .from_local_datetime(&date.and_time(time))
        .earliest()
        .map(|t| t.with_timezone(&Utc))
        .ok_or_else(|| format!("'{s}' does not exist in the local time zone").into())
}

/// A line typed into the running daemon.
#[derive(Debug, PartialEq, Eq)]
enum DaemonCommand {
    Stop(String),
    Snooze(String),
    Cancel(String),
    Status,
    Invoke {
        method: String,
        args: serde_json::Value,
    },
    Quit,
}

const DAEMON_HELP: &str =
    "commands: stop <id> | snooze <id> | cancel <id> | status | invoke <method> [json] | quit";

fn parse_command(line: &str) -> Result<DaemonCommand, String> {
    let line = line.trim();
    let (word, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
    let rest = rest.trim();
    let id = || {
        if rest.is_empty() {
            Err(format!("{word} needs a medicine ID"))
        } else {
            Ok(rest.to_string())
        }
    };

    match word {
        "stop" => id().map(DaemonCommand::Stop),
        "snooze" => id().map(DaemonCommand::Snooze),
        "cancel" => id().map(DaemonCommand::Cancel),
        "status" => Ok(DaemonCommand::Status),
        "quit" | "exit" => Ok(DaemonCommand::Quit),
        "invoke" => {
            let (method, args) = rest.split_once(char::is_whitespace).unwrap_or((rest, ""));
            if method.is_empty() {
                return Err("invoke needs a method name".into());
            }
            let args = if args.trim().is_empty() {
                serde_json::Value::Null
            } else {
                serde_json::from_str(args).map_err(|e| format!("invalid JSON arguments: {e}"))?
            };
            Ok(DaemonCommand::Invoke {
                method: method.to_string(),
                args,
            })
        }
        "" => Err(DAEMON_HELP.into()),
        other => Err(format!("unknown command '{other}'; {DAEMON_HELP}")),
    }
}

struct Daemon {
    timers: Arc<InMemoryTimerService>,
    scheduler: Arc<AlarmScheduler>,
    handler: FiringHandler,
    commands: AlarmCommands,
    store: ScheduleStore,
}

async fn daemon(config: Config, store: ScheduleStore) -> Result<(), Box<dyn Error>> {
    let timers = Arc::new(InMemoryTimerService::new().with_inexact_slack(config.inexact_slack()));
    timers.set_exact_permitted(config.alarm.exact_permitted);
    let scheduler = Arc::new(AlarmScheduler::new(
        timers.clone(),
        Arc::new(SystemClock),
        OccurrenceCalculator::local(),
        config.scheduler_config(),
    ));
    let handler = FiringHandler::new(
        scheduler.clone(),
        Arc::new(TerminalPresenter::default()),
        Arc::new(TerminalNotifications {
            channel_name: config.notifications.channel_name.clone(),
        }),
        config.alert_config(),
    );
    let daemon = Daemon {
        commands: AlarmCommands::new(scheduler.clone()),
        timers,
        scheduler,
        handler,
        store,
    };

    let restored = daemon.scheduler.restore(daemon.store.load()?);
    tracing::info!(count = restored.len(), "Schedules restored");
    daemon.print_status()?;
    println!("{DAEMON_HELP}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut tick = tokio::time::interval(Duration::from_secs(1));

    loop {
        tokio::select! {
            _ = tick.tick() => daemon.deliver_due(),
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_command(&line) {
                    Ok(DaemonCommand::Quit) => break,
                    Ok(command) => {
                        if let Err(e) = daemon.execute(command) {
                            eprintln!("error: {e}");
                        }
                    }
                    Err(message) => eprintln!("{message}"),
                }
            }
        }
    }

    tracing::info!("Daemon stopped");
    Ok(())
}

impl Daemon {
    fn deliver_due(&self) {
        for event in self.timers.take_due(Utc::now()) {
            let medicine_id = event.medicine_id().clone();
            match self.handler.handle(Action::Fire { event }) {
                Ok(HandleOutcome::Alerted { next, .. }) => match next {
                    Some(t) => println!(
                        "next {medicine_id}: {}",
                        t.with_timezone(&Local).format("%a %Y-%m-%d %H:%M")
                    ),
                    None => println!("{medicine_id}: schedule finished"),
                },
                Ok(_) => {}
                Err(e) => tracing::error!(%medicine_id, error = %e, "Fire handling failed"),
            }
        }
        if let Err(e) = self.handler.silence_expired() {
            tracing::error!(error = %e, "Failed to silence expired alerts");
        }
    }

    fn execute(&self, command: DaemonCommand) -> Result<(), Box<dyn Error>> {
        match command {
            DaemonCommand::Stop(id) => self.respond(&id, false)?,
            DaemonCommand::Snooze(id) => self.respond(&id, true)?,
            DaemonCommand::Cancel(id) => {
                let medicine_id = MedicineId::new(id)?;
                self.scheduler.cancel(&medicine_id)?;
                self.store.remove(&medicine_id)?;
                println!("cancelled {medicine_id}");
            }
            DaemonCommand::Status => self.print_status()?,
            DaemonCommand::Invoke { method, args } => {
                match self.commands.invoke(&method, args.clone()) {
                    Ok(value) => {
                        self.sync_store(&method, args)?;
                        println!("{}", json!({ "ok": value }));
                    }
                    Err(e) => println!(
                        "{}",
                        json!({ "error": { "code": e.code(), "message": e.to_string() } })
                    ),
                }
            }
            DaemonCommand::Quit => {}
        }
        Ok(())
    }

    /// Stop or snooze the newest alert raised for `id`.
    fn respond(&self, id: &str, snooze: bool) -> Result<(), Box<dyn Error>> {
        let medicine_id = MedicineId::new(id)?;
        let Some(alert) = self
            .handler
            .active_alerts()?
            .into_iter()
            .rev()
            .find(|a| a.medicine_id == medicine_id)
        else {
            println!("no active alert for {medicine_id}");
            return Ok(());
        };
        let action = if snooze {
            Action::Snooze {
                medicine_id,
                alert_key: alert.alert_key,
            }
        } else {
            Action::Stop {
                medicine_id,
                alert_key: alert.alert_key,
            }
        };
        match self.handler.handle(action)? {
            HandleOutcome::Snoozed {
                snooze: Some(s), ..
            } => println!(
                "snoozed until {}",
                s.fire_at.with_timezone(&Local).format("%H:%M:%S")
            ),
            HandleOutcome::Snoozed { snooze: None, .. } => {
                println!("alert dismissed; medication no longer scheduled")
            }
            HandleOutcome::Stopped { .. } => println!("stopped"),
            other => println!("{other:?}"),
        }
        Ok(())
    }

    /// Mirror successful method calls into the schedule store.
    fn sync_store(&self, method: &str, args: serde_json::Value) -> Result<(), Box<dyn Error>> {
        match method {
            "scheduleAlarm" => {
                let args: ScheduleAlarmArgs = serde_json::from_value(args)?;
                self.store.upsert(args.into_schedule(&Local)?)?;
            }
            "cancelAlarm" => {
                if let Some(id) = args.get("medicineId").and_then(|v| v.as_str()) {
                    self.store.remove(&MedicineId::new(id)?)?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn print_status(&self) -> Result<(), Box<dyn Error>> {
        let chains: Vec<ChainStatus> = self.scheduler.active()?;
        let alerts = self.handler.active_alerts()?;
        let out = json!({ "chains": chains, "alerts": alerts });
        println!("{}", serde_json::to_string_pretty(&out)?);
        Ok(())
    }
}
