use super::strings::{tr, tr_args};
use super::{bool_field, int_field, join_array, obj, str_field, CallbackKind, LogLine};
use crate::model::LogLevel;
use serde_json::Value;

/// `ProcessTask` start events worth showing: engine task name, template, level.
/// Names not listed here are ignored.
const PROCESS_TASK_STARTS: &[(&str, &str, LogLevel)] = &[
    ("StartButton2", "MissionStart", LogLevel::Info),
    ("AnnihilationConfirm", "MissionStart", LogLevel::Info),
    ("BattleStartAll", "MissionStart", LogLevel::Info),
    ("AbandonAction", "ActingCommandError", LogLevel::Error),
    ("FightMissionFailedAndStop", "FightMissionFailedAndStop", LogLevel::Error),
    ("RecruitRefreshConfirm", "LabelsRefreshed", LogLevel::Info),
    ("RecruitConfirm", "RecruitConfirm", LogLevel::Info),
    ("InfrastDormDoubleConfirmButton", "InfrastDormDoubleConfirmed", LogLevel::Error),
    ("ExitThenAbandon", "ExplorationAbandoned", LogLevel::RoguelikeAbandon),
    ("MissionCompletedFlag", "FightCompleted", LogLevel::RoguelikeSuccess),
    ("MissionFailedFlag", "FightFailed", LogLevel::Error),
    ("StageTrader", "Trader", LogLevel::Info),
    ("StageSafeHouse", "SafeHouse", LogLevel::Info),
    ("StageFilterTruth", "FilterTruth", LogLevel::Info),
    ("StageCombatOps", "CombatOps", LogLevel::RoguelikeCombat),
    ("StageEmergencyOps", "EmergencyOps", LogLevel::RoguelikeEmergency),
    ("StageDreadfulFoe", "DreadfulFoe", LogLevel::RoguelikeBoss),
    ("StageDreadfulFoe-5", "DreadfulFoe", LogLevel::RoguelikeBoss),
    ("StageTraderInvestSystemFull", "UpperLimit", LogLevel::Info),
    ("OfflineConfirm", "GameDrop", LogLevel::Warning),
    ("GamePass", "RoguelikeGamePass", LogLevel::Rare),
    (
        "StageTraderSpecialShoppingAfterRefresh",
        "RoguelikeSpecialItemBought",
        LogLevel::Rare,
    ),
    (
        "DeepExplorationNotUnlockedComplain",
        "DeepExplorationNotUnlockedComplain",
        LogLevel::Warning,
    ),
    ("PNS-Resume", "ReclamationPnsModeError", LogLevel::Error),
    ("PIS-Commence", "ReclamationPisModeError", LogLevel::Error),
    ("StageDrops-Stars-3", "CompleteCombat", LogLevel::Info),
    ("StageDrops-Stars-Adverse", "CompleteCombat", LogLevel::Info),
];

fn process_task_entry(task: &str) -> Option<(&'static str, LogLevel)> {
    PROCESS_TASK_STARTS
        .iter()
        .find(|(name, _, _)| *name == task)
        .map(|(_, key, level)| (*key, *level))
}

/// Sub-task callbacks (20000..=20003).
pub(super) fn handle(kind: CallbackKind, details: &Value) -> Vec<LogLine> {
    match kind {
        CallbackKind::SubTaskError => error(details),
        CallbackKind::SubTaskStart => start(details),
        CallbackKind::SubTaskCompleted => completed(details),
        CallbackKind::SubTaskExtraInfo => extra_info(details),
        other => {
            tracing::warn!(kind = ?other, "not a sub task callback");
            Vec::new()
        }
    }
}

fn error(details: &Value) -> Vec<LogLine> {
    let Some(subtask) = str_field(details, "subtask") else {
        return Vec::new();
    };
    let line = match subtask.as_str() {
        "StartGameTask" => LogLine::new(tr("FailedToOpenClient"), LogLevel::Error),
        "StopGameTask" => LogLine::new(tr("CloseArknightsFailed"), LogLevel::Error),
        "AutoRecruitTask" => {
            let why = str_field(details, "why").unwrap_or_else(|| tr("ErrorOccurred"));
            LogLine::new(format!("{why}, {}", tr("HasReturned")), LogLevel::Error)
        }
        "RecognizeDrops" => LogLine::new(tr("DropRecognitionError"), LogLevel::Error),
        "ReportToPenguinStats" => {
            let why = str_field(details, "why").unwrap_or_default();
            LogLine::new(
                format!("{why}, {}", tr("GiveUpUploadingPenguins")),
                LogLevel::Warning,
            )
        }
        "CheckStageValid" => LogLine::new(tr("TheEx"), LogLevel::Error),
        "BattleFormationTask" => LogLine::new(tr("MissingOperators"), LogLevel::Error),
        "CopilotTask" => {
            let inner = obj(details, "details");
            match inner.and_then(|d| str_field(d, "what")).as_deref() {
                Some("UserAdditionalOperInvalid") => {
                    let name = inner
                        .and_then(|d| str_field(d, "name"))
                        .unwrap_or_default();
                    LogLine::new(
                        tr_args("CopilotUserAdditionalNameInvalid", &[&name]),
                        LogLevel::Error,
                    )
                }
                _ => return Vec::new(),
            }
        }
        other => {
            tracing::debug!(subtask = other, "sub task error not shown");
            return Vec::new();
        }
    };
    vec![line]
}

fn start(details: &Value) -> Vec<LogLine> {
    match str_field(details, "subtask").as_deref() {
        Some("ProcessTask") => {
            let Some(inner) = obj(details, "details") else {
                return Vec::new();
            };
            let Some(task) = str_field(inner, "task") else {
                return Vec::new();
            };
            if task == "StoneConfirm" {
                let times = int_field(inner, "exec_times").unwrap_or(0);
                return vec![LogLine::new(
                    format!("{} {times} {}", tr("StoneUsed"), tr("UnitTime")),
                    LogLevel::Info,
                )];
            }
            process_task_entry(&task)
                .map(|(key, level)| vec![LogLine::new(tr(key), level)])
                .unwrap_or_default()
        }
        Some("CombatRecordRecognitionTask") => str_field(details, "what")
            .map(|what| vec![LogLine::new(what, LogLevel::Message)])
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn completed(details: &Value) -> Vec<LogLine> {
    if str_field(details, "subtask").as_deref() != Some("ProcessTask") {
        return Vec::new();
    }
    let chain = str_field(details, "taskchain");
    let inner = obj(details, "details");
    let task = inner.and_then(|d| str_field(d, "task"));

    let line = match (chain.as_deref(), task.as_deref()) {
        (Some("Infrast"), Some("UnlockClues")) => {
            LogLine::new(tr("ClueExchangeUnlocked"), LogLevel::Trace)
        }
        (Some("Roguelike"), Some("StartExplore")) => {
            let times = inner.and_then(|d| int_field(d, "exec_times")).unwrap_or(0);
            LogLine::new(
                format!("{} {times} {}", tr("BegunToExplore"), tr("UnitTime")),
                LogLevel::Info,
            )
        }
        (Some("Mall"), Some("EndOfActionThenStop")) => LogLine::new(
            format!("{}{}", tr("CompleteTask"), tr("CreditFight")),
            LogLevel::Trace,
        ),
        (Some("Mall"), Some("VisitLimited" | "VisitNextBlack")) => LogLine::new(
            format!("{}{}", tr("CompleteTask"), tr("Visiting")),
            LogLevel::Trace,
        ),
        _ => return Vec::new(),
    };
    vec![line]
}

fn extra_info(details: &Value) -> Vec<LogLine> {
    let Some(what) = str_field(details, "what") else {
        return Vec::new();
    };
    let empty = Value::Null;
    let sub = obj(details, "details").unwrap_or(&empty);
    let s = |key: &str| str_field(sub, key).unwrap_or_default();
    let n = |key: &str| int_field(sub, key).unwrap_or(0);

    let line = match what.as_str() {
        "StageDrops" => LogLine::new(stage_drops(sub), LogLevel::Trace),
        "StageInfoError" => LogLine::new(tr("StageInfoError"), LogLevel::Error),
        "StageQueueUnableToAgent" => LogLine::new(
            format!("{} {} {}", tr("StageQueue"), s("stage_code"), tr("UnableToAgent")),
            LogLevel::Info,
        ),
        "StageQueueMissionCompleted" => LogLine::new(
            format!("{} {} - {} ★", tr("StageQueue"), s("stage_code"), n("stars")),
            LogLevel::Info,
        ),
        "EnterFacility" => LogLine::new(
            format!(
                "{}{} {:02}",
                tr("ThisFacility"),
                tr(&s("facility")),
                n("index").saturating_add(1)
            ),
            LogLevel::Trace,
        ),
        "ProductIncorrect" => LogLine::new(tr("ProductIncorrect"), LogLevel::Error),
        "ProductUnknown" => LogLine::new(tr("ProductUnknown"), LogLevel::Error),
        "ProductChanged" => LogLine::new(tr("ProductChanged"), LogLevel::Info),
        "CustomInfrastRoomGroupsMatch" => LogLine::new(
            format!("{}{}", tr("RoomGroupsMatch"), s("group")),
            LogLevel::Trace,
        ),
        "CustomInfrastRoomGroupsMatchFailed" => LogLine::new(
            format!(
                "{}{}",
                tr("RoomGroupsMatchFailed"),
                join_array(sub, "groups", ", ").unwrap_or_default()
            ),
            LogLevel::Trace,
        ),
        "CustomInfrastRoomOperators" => LogLine::new(
            format!(
                "{}{}",
                tr("RoomOperators"),
                join_array(sub, "names", ", ").unwrap_or_default()
            ),
            LogLevel::Trace,
        ),
        "InfrastTrainingIdle" => LogLine::new(tr("TrainingIdle"), LogLevel::Trace),
        "InfrastTrainingCompleted" => LogLine::new(
            format!(
                "[{}] {}\n{}: {} {}",
                s("operator"),
                s("skill"),
                tr("TrainingLevel"),
                n("level"),
                tr("TrainingCompleted")
            ),
            LogLevel::Info,
        ),
        "InfrastTrainingTimeLeft" => LogLine::new(
            format!(
                "[{}] {}\n{}: {}\n{}: {}",
                s("operator"),
                s("skill"),
                tr("TrainingLevel"),
                n("level"),
                tr("TrainingTimeLeft"),
                s("time")
            ),
            LogLevel::Info,
        ),
        "RecruitTagsDetected" => LogLine::new(
            format!(
                "{}\n{}",
                tr("RecruitingResults"),
                join_array(sub, "tags", "\n").unwrap_or_default()
            ),
            LogLevel::Trace,
        ),
        "RecruitResult" => {
            let level = n("level");
            let severity = if level >= 5 {
                LogLevel::Rare
            } else {
                LogLevel::Info
            };
            LogLine::new(format!("{level} ★"), severity)
        }
        "RecruitSupportOperator" => LogLine::new(
            tr_args("RecruitSupportOperator", &[&s("name")]),
            LogLevel::Info,
        ),
        "RecruitTagsSelected" => LogLine::new(
            format!(
                "{} Tags:\n{}",
                tr("Choose"),
                join_array(sub, "tags", "\n").unwrap_or_else(|| tr("NoDrop"))
            ),
            LogLevel::Trace,
        ),
        "RecruitTagsRefreshed" => LogLine::new(
            format!("{}{} {}", tr("Refreshed"), n("count"), tr("UnitTime")),
            LogLevel::Trace,
        ),
        "RecruitNoPermit" => {
            let key = if bool_field(sub, "continue").unwrap_or(false) {
                "ContinueRefresh"
            } else {
                "NoRecruitmentPermit"
            };
            LogLine::new(tr(key), LogLevel::Trace)
        }
        "NotEnoughStaff" => LogLine::new(tr("NotEnoughStaff"), LogLevel::Error),
        "CreditFullOnlyBuyDiscount" => LogLine::new(
            format!("{}{}", tr("CreditFullOnlyBuyDiscount"), s("credit")),
            LogLevel::Message,
        ),
        "StageInfo" => LogLine::new(
            format!("{}{}", tr("StartCombat"), s("name")),
            LogLevel::Trace,
        ),
        "UseMedicine" => use_medicine(sub),
        "ReclamationReport" => LogLine::new(
            format!(
                "{}\n{}: {}(+{})\n{}: {}(+{})",
                tr("AlgorithmFinish"),
                tr("AlgorithmBadge"),
                n("total_badges"),
                n("badges"),
                tr("AlgorithmConstructionPoint"),
                n("total_construction_points"),
                n("construction_points")
            ),
            LogLevel::Trace,
        ),
        "ReclamationProcedureStart" => LogLine::new(
            format!("{} {} {}", tr("MissionStart"), n("times"), tr("UnitTime")),
            LogLevel::Info,
        ),
        "ReclamationSmeltGold" => LogLine::new(
            format!(
                "{} {} {}",
                tr("AlgorithmDoneSmeltGold"),
                n("times"),
                tr("UnitTime")
            ),
            LogLevel::Trace,
        ),
        "BattleFormation" => LogLine::new(
            format!(
                "{}\n[{}]",
                tr("BattleFormation"),
                join_array(sub, "formation", ", ").unwrap_or_default()
            ),
            LogLevel::Trace,
        ),
        "BattleFormationParseFailed" => {
            LogLine::new(tr("BattleFormationParseFailed"), LogLevel::Trace)
        }
        "BattleFormationSelected" => LogLine::new(
            format!("{}{}", tr("BattleFormationSelected"), s("selected")),
            LogLevel::Trace,
        ),
        "BattleFormationOperUnavailable" => LogLine::new(
            tr_args(
                "BattleFormationOperUnavailable",
                &[&s("oper_name"), &s("requirement_type")],
            ),
            LogLevel::Error,
        ),
        "CopilotAction" => return copilot_action(sub),
        "SSSStage" => LogLine::new(tr_args("CurrentStage", &[&s("stage")]), LogLevel::Info),
        "SSSSettlement" => LogLine::new(
            str_field(details, "why").unwrap_or_default(),
            LogLevel::Info,
        ),
        "SSSGamePass" => LogLine::new(tr("SSSGamePass"), LogLevel::Rare),
        "UnsupportedLevel" => LogLine::new(
            format!("{}{}", tr("UnsupportedLevel"), s("level")),
            LogLevel::Error,
        ),
        other => {
            tracing::debug!(what = other, "sub task extra info not shown");
            return Vec::new();
        }
    };
    vec![line]
}

fn stage_drops(sub: &Value) -> String {
    let code = obj(sub, "stage")
        .and_then(|stage| str_field(stage, "stageCode"))
        .unwrap_or_default();
    let mut out = format!("{code} {}\n", tr("TotalDrop"));

    let stats = sub.get("stats").and_then(Value::as_array);
    match stats {
        Some(stats) if !stats.is_empty() => {
            let rows: Vec<String> = stats
                .iter()
                .map(|item| {
                    let name = str_field(item, "itemName").unwrap_or_default();
                    let name = if name == "furni" {
                        tr("FurnitureDrop")
                    } else {
                        name
                    };
                    let quantity = int_field(item, "quantity").unwrap_or(0);
                    match int_field(item, "addQuantity").unwrap_or(0) {
                        add if add > 0 => format!("{name} : {quantity} (+{add})"),
                        _ => format!("{name} : {quantity}"),
                    }
                })
                .collect();
            out.push_str(&rows.join("\n"));
        }
        _ => out.push_str(&tr("NoDrop")),
    }

    let runs = int_field(sub, "cur_times").unwrap_or(-1);
    if runs >= 0 {
        out.push_str(&format!("\n{} : {runs}", tr("CurTimes")));
    }
    out
}

fn use_medicine(sub: &Value) -> LogLine {
    let count = int_field(sub, "count").unwrap_or(0);
    if count == -1 {
        LogLine::new(format!("{} Unknown times", tr("MedicineUsed")), LogLevel::Error)
    } else if bool_field(sub, "is_expiring").unwrap_or(false) {
        LogLine::new(
            format!("{} (+{count})", tr("ExpiringMedicineUsed")),
            LogLevel::Info,
        )
    } else {
        LogLine::new(format!("{} (+{count})", tr("MedicineUsed")), LogLevel::Info)
    }
}

fn copilot_action(sub: &Value) -> Vec<LogLine> {
    let mut lines = Vec::with_capacity(2);
    match str_field(sub, "doc").filter(|doc| !doc.is_empty()) {
        Some(doc) => lines.push(LogLine::new(doc, LogLevel::Message)),
        None => {
            let action = tr(&str_field(sub, "action").unwrap_or_default());
            let target = str_field(sub, "target").unwrap_or_default();
            lines.push(LogLine::new(
                tr_args("CurrentSteps", &[&action, &target]),
                LogLevel::Trace,
            ));
        }
    }
    if let Some(elapsed) = int_field(sub, "elapsed_time").filter(|ms| *ms >= 0) {
        lines.push(LogLine::new(
            tr_args("ElapsedTime", &[&elapsed]),
            LogLevel::Message,
        ));
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn process_start(task: &str, extra: Value) -> Vec<LogLine> {
        let mut inner = json!({"task": task});
        if let (Some(inner), Some(extra)) = (inner.as_object_mut(), extra.as_object()) {
            inner.extend(extra.clone());
        }
        handle(
            CallbackKind::SubTaskStart,
            &json!({"subtask": "ProcessTask", "details": inner}),
        )
    }

    #[test]
    fn process_task_table_lookup() {
        assert_eq!(
            process_start("StageCombatOps", json!({})),
            vec![LogLine::new(tr("CombatOps"), LogLevel::RoguelikeCombat)]
        );
        assert_eq!(
            process_start("GamePass", json!({}))[0].level,
            LogLevel::Rare
        );
        assert!(process_start("SomeInternalStep", json!({})).is_empty());
    }

    #[test]
    fn stone_confirm_appends_the_count() {
        let out = process_start("StoneConfirm", json!({"exec_times": 3}));
        assert_eq!(out[0].content, "Originite Prime used 3 time(s)");
        assert_eq!(out[0].level, LogLevel::Info);
    }

    #[test]
    fn recruit_result_is_rare_from_five_stars() {
        let result = |level: i64| {
            handle(
                CallbackKind::SubTaskExtraInfo,
                &json!({"what": "RecruitResult", "details": {"level": level}}),
            )
        };
        assert_eq!(result(4)[0].level, LogLevel::Info);
        assert_eq!(result(5)[0].level, LogLevel::Rare);
        assert_eq!(result(6)[0], LogLine::new("6 ★", LogLevel::Rare));
    }

    #[test]
    fn stage_drops_lists_items() {
        let out = handle(
            CallbackKind::SubTaskExtraInfo,
            &json!({"what": "StageDrops", "details": {
                "stage": {"stageCode": "1-7"},
                "stats": [
                    {"itemName": "Orirock", "quantity": 12, "addQuantity": 2},
                    {"itemName": "furni", "quantity": 1, "addQuantity": 0}
                ],
                "cur_times": 4
            }}),
        );
        assert_eq!(
            out[0].content,
            "1-7 drops:\nOrirock : 12 (+2)\nFurniture : 1\nRuns : 4"
        );
    }

    #[test]
    fn stage_drops_without_stats() {
        let out = handle(
            CallbackKind::SubTaskExtraInfo,
            &json!({"what": "StageDrops", "details": {"stage": {"stageCode": "CE-6"}}}),
        );
        assert_eq!(out[0].content, "CE-6 drops:\nnone");
    }

    #[test]
    fn enter_facility_pads_the_index() {
        let out = handle(
            CallbackKind::SubTaskExtraInfo,
            &json!({"what": "EnterFacility", "details": {"facility": "Mfg", "index": 0}}),
        );
        assert_eq!(out[0].content, "Current facility: Factory 01");

        let out = handle(
            CallbackKind::SubTaskExtraInfo,
            &json!({"what": "EnterFacility", "details": {"facility": "Mfg", "index": i64::MAX}}),
        );
        assert!(out[0].content.ends_with(&i64::MAX.to_string()));
    }

    #[test]
    fn copilot_action_with_elapsed_time() {
        let out = handle(
            CallbackKind::SubTaskExtraInfo,
            &json!({"what": "CopilotAction", "details": {
                "action": "Deploy", "target": "Exusiai", "elapsed_time": 1500
            }}),
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "Current step: Deploy Exusiai");
        assert_eq!(out[1].level, LogLevel::Message);
    }

    #[test]
    fn sub_task_errors() {
        let out = handle(
            CallbackKind::SubTaskError,
            &json!({"subtask": "AutoRecruitTask", "why": "No permit"}),
        );
        assert_eq!(
            out[0],
            LogLine::new("No permit, returned to the main screen", LogLevel::Error)
        );
        assert!(handle(CallbackKind::SubTaskError, &json!({"subtask": "Other"})).is_empty());
    }

    #[test]
    fn medicine_usage() {
        let out = |sub: Value| {
            handle(
                CallbackKind::SubTaskExtraInfo,
                &json!({"what": "UseMedicine", "details": sub}),
            )
        };
        assert_eq!(out(json!({"count": -1}))[0].level, LogLevel::Error);
        assert!(out(json!({"count": 2, "is_expiring": true}))[0]
            .content
            .starts_with("Expiring"));
    }
}
