//! Named read-only queries against the extraction app.
//!
//! Scenarios read application state only through this fixed set, so the
//! harness depends on a small contract rather than on whatever globals the
//! page happens to expose. Every expression is side-effect free and returns
//! `null` instead of throwing when the state it looks for is missing.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Result contract version this harness understands
pub const SUPPORTED_CONTRACT_VERSION: u64 = 1;

/// Global the app sets to report a structured outcome
pub const CONTRACT_GLOBAL: &str = "__STUDY_ACCEPTANCE_RESULT__";

/// A read-only query with a stable name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Probe {
    /// Whether a document is loaded in the app state
    DocumentLoaded,
    /// Section/table/citation counts of the preprocessing output
    PreprocessingSummary,
    /// The full preprocessing output
    PreprocessingData,
    /// Whether preprocessing output exists at all
    PreprocessingDataPresent,
    /// Sidebar open state, header counts and list lengths
    SidebarState,
    SidebarCollapsed,
    /// Overlay canvas on the first rendered page
    OverlayState,
    /// Computed `display` of the first overlay canvas
    OverlayDisplay,
    /// What the overlay renderer holds
    OverlayRendererStatus,
    /// Current page according to app state, falling back to the page field
    CurrentPage,
    /// Value of the page number field
    PageNumberField,
    /// Stage/detail text of the preprocessing progress bar, when visible
    PreprocessingProgress,
    /// `{test, result}` for every `.result` panel on the model diagnostics page
    ResultPanels,
    /// Structured outcome published by the app
    ResultContract,
}

impl Probe {
    pub const ALL: [Probe; 14] = [
        Probe::DocumentLoaded,
        Probe::PreprocessingSummary,
        Probe::PreprocessingData,
        Probe::PreprocessingDataPresent,
        Probe::SidebarState,
        Probe::SidebarCollapsed,
        Probe::OverlayState,
        Probe::OverlayDisplay,
        Probe::OverlayRendererStatus,
        Probe::CurrentPage,
        Probe::PageNumberField,
        Probe::PreprocessingProgress,
        Probe::ResultPanels,
        Probe::ResultContract,
    ];

    /// Key under which the result is stored
    pub fn name(&self) -> &'static str {
        match self {
            Probe::DocumentLoaded => "document_loaded",
            Probe::PreprocessingSummary => "preprocessing_summary",
            Probe::PreprocessingData => "preprocessing_data",
            Probe::PreprocessingDataPresent => "preprocessing_data_present",
            Probe::SidebarState => "sidebar_state",
            Probe::SidebarCollapsed => "sidebar_collapsed",
            Probe::OverlayState => "overlay_state",
            Probe::OverlayDisplay => "overlay_display",
            Probe::OverlayRendererStatus => "overlay_renderer_status",
            Probe::CurrentPage => "current_page",
            Probe::PageNumberField => "page_number_field",
            Probe::PreprocessingProgress => "preprocessing_progress",
            Probe::ResultPanels => "result_panels",
            Probe::ResultContract => "result_contract",
        }
    }

    pub fn from_name(name: &str) -> Option<Probe> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }

    /// JavaScript expression evaluated in the page
    pub fn expression(&self) -> &'static str {
        match self {
            Probe::DocumentLoaded => {
                "(() => typeof AppStateManager !== 'undefined' && AppStateManager.getState().pdfDoc != null)()"
            }
            Probe::PreprocessingSummary => {
                r#"(() => {
    if (typeof AppStateManager === 'undefined') return null;
    const data = AppStateManager.getState().preprocessingData;
    if (!data) return null;
    return {
        sections: (data.sections || []).length,
        tables: (data.tables || []).length,
        citations: (data.citations || []).length
    };
})()"#
            }
            Probe::PreprocessingData => {
                "(() => typeof AppStateManager === 'undefined' ? null : (AppStateManager.getState().preprocessingData || null))()"
            }
            Probe::PreprocessingDataPresent => {
                "(() => typeof AppStateManager !== 'undefined' && AppStateManager.getState().preprocessingData != null)()"
            }
            Probe::SidebarState => {
                r#"(() => {
    const sidebar = document.getElementById('preprocessing-sidebar');
    if (!sidebar) return null;
    const text = id => { const el = document.getElementById(id); return el ? el.textContent : null; };
    const items = id => { const el = document.getElementById(id); return el ? el.children.length : 0; };
    return {
        isOpen: !sidebar.classList.contains('collapsed'),
        counts: { sections: text('section-count'), tables: text('table-count'), citations: text('citation-count') },
        listItems: { sections: items('sections-list'), tables: items('tables-list'), citations: items('citations-list') }
    };
})()"#
            }
            Probe::SidebarCollapsed => {
                "(() => { const s = document.getElementById('preprocessing-sidebar'); return s ? s.classList.contains('collapsed') : null; })()"
            }
            Probe::OverlayState => {
                r#"(() => {
    const pageDiv = document.querySelector('.pdf-page');
    if (!pageDiv) return { pageExists: false };
    const overlay = pageDiv.querySelector('.pdf-overlay');
    return {
        pageExists: true,
        pageId: pageDiv.id,
        overlayExists: overlay !== null,
        overlayVisible: overlay ? getComputedStyle(overlay).display !== 'none' : false,
        overlayWidth: overlay ? overlay.width : null,
        overlayHeight: overlay ? overlay.height : null,
        pageCount: document.querySelectorAll('.pdf-page').length,
        overlayCount: document.querySelectorAll('.pdf-overlay').length
    };
})()"#
            }
            Probe::OverlayDisplay => {
                "(() => { const o = document.querySelector('.pdf-overlay'); return o ? getComputedStyle(o).display : null; })()"
            }
            Probe::OverlayRendererStatus => {
                r#"(() => {
    if (typeof PreprocessingOverlayRenderer === 'undefined') return { exists: false };
    const data = PreprocessingOverlayRenderer.preprocessingData;
    return {
        exists: true,
        hasData: data != null,
        sectionCount: (data && data.sections) ? data.sections.length : 0,
        tableCount: (data && data.tables) ? data.tables.length : 0
    };
})()"#
            }
            Probe::CurrentPage => {
                r#"(() => {
    if (typeof AppStateManager !== 'undefined') {
        const page = AppStateManager.getState().currentPage;
        if (page != null) return page;
    }
    const field = document.getElementById('page-num');
    return field ? field.value : null;
})()"#
            }
            Probe::PageNumberField => {
                "(() => { const f = document.getElementById('page-num'); return f ? f.value : null; })()"
            }
            Probe::PreprocessingProgress => {
                r#"(() => {
    const bar = document.getElementById('preprocessing-progress');
    if (!bar || bar.offsetParent === null) return null;
    const text = id => { const el = document.getElementById(id); return el ? el.textContent : null; };
    return { stage: text('preprocessing-stage'), detail: text('preprocessing-detail') };
})()"#
            }
            Probe::ResultPanels => {
                "(() => Array.from(document.querySelectorAll('.result')).map((el, i) => ({ test: 'Test ' + (i + 1), result: el.innerText })))()"
            }
            Probe::ResultContract => {
                "(() => { const r = window.__STUDY_ACCEPTANCE_RESULT__; return r === undefined ? null : r; })()"
            }
        }
    }
}

/// Probe results collected during a run, keyed by name
pub type ProbeResults = BTreeMap<String, Value>;

/// JavaScript truthiness of a JSON value
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0 && !f.is_nan()).unwrap_or(true),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Outcome shown by one diagnostics panel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelStatus {
    Passed,
    Failed,
    /// Still running, or no outcome mark at all
    Pending,
}

/// One `.result` panel as read by [`Probe::ResultPanels`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultPanel {
    pub test: String,
    pub result: String,
}

impl ResultPanel {
    /// ✅ passes, otherwise ❌ fails
    pub fn status(&self) -> PanelStatus {
        if self.result.contains('✅') {
            PanelStatus::Passed
        } else if self.result.contains('❌') {
            PanelStatus::Failed
        } else {
            PanelStatus::Pending
        }
    }

    /// Parse a probe value; anything that is not a list of panels reads as none
    pub fn parse_all(value: &Value) -> Vec<ResultPanel> {
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// Outcome reported by the app through the result contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContractStatus {
    Success,
    Failure,
    Pending,
}

/// Parsed `window.__STUDY_ACCEPTANCE_RESULT__`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContractResult {
    pub version: u64,
    pub status: ContractStatus,
    #[serde(default)]
    pub detail: Option<String>,
}

impl ContractResult {
    /// Parse a probe value; `None` if absent, malformed, or of an unsupported version
    pub fn parse(value: &Value) -> Option<ContractResult> {
        if value.is_null() {
            return None;
        }
        let result: ContractResult = serde_json::from_value(value.clone()).ok()?;
        (result.version == SUPPORTED_CONTRACT_VERSION).then_some(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_probe_names_are_unique_and_round_trip() {
        let mut seen = std::collections::HashSet::new();
        for probe in Probe::ALL {
            assert!(seen.insert(probe.name()), "duplicate name {}", probe.name());
            assert_eq!(Probe::from_name(probe.name()), Some(probe));
        }
        assert_eq!(Probe::from_name("nope"), None);
    }

    #[test]
    fn test_contract_probe_reads_the_contract_global() {
        assert!(Probe::ResultContract.expression().contains(CONTRACT_GLOBAL));
    }

    #[test]
    fn test_truthiness_matches_javascript() {
        assert!(!is_truthy(&Value::Null));
        assert!(!is_truthy(&json!(false)));
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!(3)));
        assert!(is_truthy(&json!([])));
        assert!(is_truthy(&json!({})));
    }

    #[test]
    fn test_result_panels_classify_by_mark() {
        let value = json!([
            {"test": "Test 1", "result": "✅ gemini-2.5-flash responded"},
            {"test": "Test 2", "result": "❌ 404: models/gemini-1.5-flash"},
            {"test": "Test 3", "result": "Running..."},
        ]);
        let statuses: Vec<PanelStatus> =
            ResultPanel::parse_all(&value).iter().map(ResultPanel::status).collect();
        assert_eq!(statuses, [PanelStatus::Passed, PanelStatus::Failed, PanelStatus::Pending]);

        assert!(ResultPanel::parse_all(&Value::Null).is_empty());
        assert!(ResultPanel::parse_all(&json!(["bare text"])).is_empty());
    }

    #[test]
    fn test_contract_parsing() {
        let ok = json!({"version": 1, "status": "success", "detail": "metadata populated"});
        assert_eq!(
            ContractResult::parse(&ok),
            Some(ContractResult {
                version: 1,
                status: ContractStatus::Success,
                detail: Some("metadata populated".to_string()),
            })
        );
        assert_eq!(ContractResult::parse(&json!({"version": 2, "status": "success"})), None);
        assert_eq!(ContractResult::parse(&json!({"version": 1, "status": "weird"})), None);
        assert_eq!(ContractResult::parse(&Value::Null), None);
    }
}
