//! Model-facing agents: one wrapper per pipeline role, each owning its output
//! schema, prompt, and documented failure fallback.

pub mod gating;
pub mod generator;
pub mod planner;
pub mod reviewer;
pub mod test_fixer;
pub mod test_writer;

/// Coding conventions shared by the planner and generator prompts. A repo can
/// override these with `.autopr/rules.md`.
pub const DEFAULT_CODE_RULES: &str = "\
- TypeScript everywhere; components are function components.
- Pages live under app/, shared components under components/, helpers under lib/.
- Prefer server components; add 'use client' only when state or handlers are needed.
- Keep styling in the existing CSS module / utility-class convention of the repo.
";
