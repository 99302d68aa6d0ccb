//! Probe Injection
//!
//! Rewrites an analyzed unit so that:
//! - the body starts with [`Node::AcquirePayload`], which creates the unit's
//!   payload on first use through the runtime's `create_payload`
//! - each span's entry is preceded by a write of `true` to its cell
//!
//! Probes never throw and never reorder user code. A probe runs before the work
//! of its span, so a span whose work throws is still reported as visited.

mod rewrite;

use crate::analysis::{AnalyzedModule, AnalyzedUnit, SpanTable};
use crate::error::{CoverageError, CoverageResult};
use crate::lowered::{Body, LoweredModule, UnitKind};
use raya_coverage_runtime::{MethodToken, ModuleId, CONTRACT_VERSION};
use rewrite::UnitRewriter;
use tracing::debug;

/// Instrumentation options
#[derive(Debug, Clone)]
pub struct InstrumentOptions {
    /// Version id of the module being compiled, passed to `create_payload`
    pub module_id: ModuleId,
    /// When false, units pass through without probes or payload slots
    pub enabled: bool,
}

impl InstrumentOptions {
    pub fn for_module(module_id: ModuleId) -> Self {
        Self {
            module_id,
            enabled: true,
        }
    }
}

impl Default for InstrumentOptions {
    fn default() -> Self {
        Self {
            module_id: ModuleId::new(0),
            enabled: true,
        }
    }
}

/// Process-wide payload storage a unit declares
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotDecl {
    pub token: MethodToken,
    /// Number of cells, equal to the unit's span count
    pub length: usize,
}

/// One unit after probe injection
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentedUnit {
    /// Rewritten body; nested unit boundaries are removed and emitted as
    /// separate units
    pub body: Body,
    pub slot: Option<SlotDecl>,
    pub contract_version: u32,
}

impl InstrumentedUnit {
    pub fn token(&self) -> MethodToken {
        self.body.token
    }

    pub fn name(&self) -> &str {
        &self.body.name
    }

    pub fn kind(&self) -> UnitKind {
        self.body.kind
    }

    /// Number of payload cells (zero when not instrumented)
    pub fn payload_len(&self) -> usize {
        self.slot.map(|s| s.length).unwrap_or(0)
    }
}

/// All units of a module after injection, parents before nested units
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentedModule {
    pub name: String,
    pub module_id: ModuleId,
    pub units: Vec<InstrumentedUnit>,
}

impl InstrumentedModule {
    pub fn unit(&self, token: MethodToken) -> Option<&InstrumentedUnit> {
        self.units.iter().find(|u| u.token() == token)
    }

    pub fn unit_named(&self, name: &str) -> Option<&InstrumentedUnit> {
        self.units.iter().find(|u| u.name() == name)
    }
}

/// Injects probes according to frozen span tables
#[derive(Debug, Clone, Default)]
pub struct ProbeInjector {
    options: InstrumentOptions,
}

impl ProbeInjector {
    pub fn new(options: InstrumentOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &InstrumentOptions {
        &self.options
    }

    /// Instrument every unit of `module` using its analysis
    pub fn instrument_module(
        &self,
        module: &LoweredModule,
        analysis: &AnalyzedModule,
    ) -> CoverageResult<InstrumentedModule> {
        let mut units = Vec::new();
        for body in &module.units {
            self.instrument_into(body, analysis, &mut units)?;
        }
        Ok(InstrumentedModule {
            name: module.name.clone(),
            module_id: self.options.module_id,
            units,
        })
    }

    /// Instrument one body and every unit nested in it
    pub fn instrument_body(
        &self,
        body: &Body,
        analysis: &AnalyzedModule,
    ) -> CoverageResult<Vec<InstrumentedUnit>> {
        let mut units = Vec::new();
        self.instrument_into(body, analysis, &mut units)?;
        Ok(units)
    }

    fn instrument_into(
        &self,
        body: &Body,
        analysis: &AnalyzedModule,
        out: &mut Vec<InstrumentedUnit>,
    ) -> CoverageResult<()> {
        let (instrumented, nested) = if self.options.enabled {
            let unit = analysis
                .unit(body.token)
                .ok_or_else(|| CoverageError::MissingSpanTable {
                    unit: body.name.clone(),
                    token: body.token,
                })?;
            self.inject(body, unit)?
        } else {
            passthrough(body)
        };
        out.push(instrumented);

        for nested_body in nested {
            self.instrument_into(nested_body, analysis, out)?;
        }
        Ok(())
    }

    fn inject<'b>(
        &self,
        body: &'b Body,
        unit: &AnalyzedUnit,
    ) -> CoverageResult<(InstrumentedUnit, Vec<&'b Body>)> {
        let mut rewriter = UnitRewriter::new(&unit.spans, true);
        let root = rewriter.rewrite_root(&body.root);
        let placed = rewriter.finish(&body.name)?;

        debug!(
            unit = %body.name,
            token = %body.token,
            probes = placed,
            "injected coverage probes"
        );

        let instrumented = InstrumentedUnit {
            body: Body {
                root,
                ..shallow_clone(body)
            },
            slot: Some(SlotDecl {
                token: body.token,
                length: unit.spans.len(),
            }),
            contract_version: CONTRACT_VERSION,
        };
        Ok((instrumented, rewriter.into_nested()))
    }
}

fn passthrough(body: &Body) -> (InstrumentedUnit, Vec<&Body>) {
    let empty = SpanTable::default();
    let mut rewriter = UnitRewriter::new(&empty, false);
    let root = rewriter.rewrite(&body.root);
    let instrumented = InstrumentedUnit {
        body: Body {
            root,
            ..shallow_clone(body)
        },
        slot: None,
        contract_version: CONTRACT_VERSION,
    };
    (instrumented, rewriter.into_nested())
}

/// Copy of the body's header with an empty root
fn shallow_clone(body: &Body) -> Body {
    Body {
        token: body.token,
        name: body.name.clone(),
        kind: body.kind,
        params: body.params.clone(),
        root: crate::lowered::Node::Seq(Vec::new()),
        range: body.range,
    }
}
