pub mod styles;

use crate::interpret::InterpretedResponse;
use crate::session::{Operation, SessionState, Step, UploadError, UploadedImage};

use styles::StyleCatalog;

/// What a completed wizard pass hands to the request composer.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub operation: Operation,
    pub style_key: Option<String>,
    pub prompt: String,
    pub image: Option<UploadedImage>,
}

/// The three-step flow driver. All transition rules live here as pure
/// functions over the session record; rendering subscribes to the state and
/// never decides anything itself.
#[derive(Debug, Clone)]
pub struct Wizard {
    state: SessionState,
    catalog: StyleCatalog,
}

impl Wizard {
    pub fn new() -> Self {
        Self {
            state: SessionState::new(),
            catalog: StyleCatalog::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut SessionState {
        &mut self.state
    }

    pub fn catalog(&self) -> &StyleCatalog {
        &self.catalog
    }

    pub fn step(&self) -> Step {
        self.state.step()
    }

    pub fn operation(&self) -> Option<Operation> {
        self.state.operation
    }

    /// Step 1 → 2. Selecting an operation both records it and moves the
    /// flow forward; previously gathered images and text survive so that
    /// switching operations is cheap.
    pub fn select_operation(&mut self, operation: Operation) {
        self.state.operation = Some(operation);
        self.state.step = Some(Step::ProvideInput);
    }

    /// Whether the "next" (or "start") control is live. Recomputed from
    /// scratch on every call; callers invoke it after each mutating event.
    pub fn next_enabled(&self) -> bool {
        match self.step() {
            Step::ChooseOperation => self.state.operation.is_some(),
            Step::ProvideInput => match self.state.operation {
                Some(Operation::Generate) => !self.state.instruction.trim().is_empty(),
                Some(Operation::Style) | Some(Operation::Creative) => {
                    !self.state.images.is_empty()
                }
                None => false,
            },
            Step::ConfirmStyle => self.can_submit(),
        }
    }

    pub fn advance(&mut self) -> Result<Step, String> {
        if !self.next_enabled() {
            return Err(match self.step() {
                Step::ChooseOperation => "choose an operation first".to_string(),
                Step::ProvideInput => match self.state.operation {
                    Some(Operation::Generate) => "enter a description first".to_string(),
                    _ => "upload at least one image first".to_string(),
                },
                Step::ConfirmStyle => {
                    "pick a preset or enter a custom instruction first".to_string()
                }
            });
        }
        let next = match self.step() {
            Step::ChooseOperation => Step::ProvideInput,
            Step::ProvideInput => Step::ConfirmStyle,
            Step::ConfirmStyle => Step::ConfirmStyle,
        };
        self.state.step = Some(next);
        Ok(next)
    }

    /// Step 3 → 2 (or closes the result overlay). Never clears state.
    pub fn back(&mut self) -> Step {
        if self.state.result_open {
            self.state.result_open = false;
        } else if self.step() == Step::ConfirmStyle {
            self.state.step = Some(Step::ProvideInput);
        }
        self.step()
    }

    /// The confirmed "start over" action. Confirmation itself is the
    /// adapter's business; calling this clears everything.
    pub fn restart(&mut self) {
        self.state.reset();
    }

    pub fn add_image(&mut self, image: UploadedImage) -> Result<(), UploadError> {
        self.state.add_image(image)
    }

    pub fn remove_image(&mut self, name: &str) -> bool {
        self.state.remove_image(name)
    }

    pub fn set_instruction(&mut self, text: &str) {
        self.state.instruction = text.to_string();
    }

    /// Picking a preset seeds the editable instruction with its template.
    pub fn select_style(&mut self, key: &str) -> Result<(), String> {
        let operation = self
            .state
            .operation
            .ok_or_else(|| "no operation selected".to_string())?;
        let spec = self
            .catalog
            .get(operation, key)
            .ok_or_else(|| format!("unknown preset: {key}"))?;
        self.state.selected_style = Some(spec.key.to_string());
        self.state.custom_instruction = spec.prompt.to_string();
        self.state.seeded_instruction = Some(spec.prompt.to_string());
        Ok(())
    }

    /// One-way invalidation: editing the seeded text away from the preset
    /// template drops the preset selection, but restoring the text does not
    /// restore the selection.
    pub fn edit_custom_instruction(&mut self, text: &str) {
        self.state.custom_instruction = text.to_string();
        if self.state.selected_style.is_some() {
            let seeded = self.state.seeded_instruction.as_deref().unwrap_or("");
            if text.trim() != seeded.trim() {
                self.state.selected_style = None;
            }
        }
    }

    pub fn can_submit(&self) -> bool {
        match self.state.operation {
            Some(Operation::Generate) => !self.state.instruction.trim().is_empty(),
            Some(Operation::Style) | Some(Operation::Creative) => {
                self.state.selected_style.is_some()
                    || !self.state.custom_instruction.trim().is_empty()
            }
            None => false,
        }
    }

    /// Resolves the collected state into a composer-ready submission, or
    /// None outside the confirm step or while its predicate does not hold.
    pub fn submission(&self) -> Option<Submission> {
        if self.step() != Step::ConfirmStyle || !self.can_submit() {
            return None;
        }
        let operation = self.state.operation?;
        let prompt = match operation {
            Operation::Generate => self.state.instruction.trim().to_string(),
            Operation::Style | Operation::Creative => match &self.state.selected_style {
                Some(key) => self.catalog.prompt_for(operation, key).to_string(),
                None => self.state.custom_instruction.trim().to_string(),
            },
        };
        let image = match operation {
            Operation::Generate => None,
            Operation::Style | Operation::Creative => self.state.selected_image().cloned(),
        };
        Some(Submission {
            operation,
            style_key: self.state.selected_style.clone(),
            prompt,
            image,
        })
    }

    pub fn open_result(&mut self, response: InterpretedResponse) {
        self.state
            .remember_ids(response.task_id.as_deref(), response.gen_id.as_deref());
        self.state.last_response = Some(response);
        self.state.result_open = true;
    }

    /// Retry routing: style edits return to the style picker, everything
    /// else to the input step.
    pub fn retry_target(&self) -> Step {
        match self.state.operation {
            Some(Operation::Style) => Step::ConfirmStyle,
            _ => Step::ProvideInput,
        }
    }

    pub fn close_result_for_retry(&mut self) -> Step {
        self.state.result_open = false;
        let target = self.retry_target();
        self.state.step = Some(target);
        target
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use crate::interpret::{InterpretedResponse, ResponseKind, ResponseStatus};
    use crate::session::mime_for_name;

    use super::*;

    fn upload(name: &str) -> UploadedImage {
        UploadedImage {
            path: PathBuf::from(name),
            name: name.to_string(),
            size: 1024,
            mime: mime_for_name(name).unwrap_or("image/png").to_string(),
            fingerprint: None,
        }
    }

    #[test]
    fn style_requires_an_image_before_step_three() {
        let mut wizard = Wizard::new();
        wizard.select_operation(Operation::Style);
        assert_eq!(wizard.step(), Step::ProvideInput);
        assert!(!wizard.next_enabled());
        assert!(wizard.advance().is_err());

        wizard.add_image(upload("photo.png")).unwrap();
        assert!(wizard.next_enabled());
        assert_eq!(wizard.advance().unwrap(), Step::ConfirmStyle);
    }

    #[test]
    fn generate_requires_instruction_text_only() {
        let mut wizard = Wizard::new();
        wizard.select_operation(Operation::Generate);
        assert!(!wizard.next_enabled());
        wizard.set_instruction("a red bicycle");
        assert!(wizard.next_enabled());
        wizard.advance().unwrap();
        assert!(wizard.can_submit());
        let submission = wizard.submission().unwrap();
        assert_eq!(submission.prompt, "a red bicycle");
        assert!(submission.image.is_none());
    }

    #[test]
    fn editing_seeded_text_clears_preset_but_keeps_control_enabled() {
        let mut wizard = Wizard::new();
        wizard.select_operation(Operation::Style);
        wizard.add_image(upload("photo.png")).unwrap();
        wizard.advance().unwrap();

        wizard.select_style("anime").unwrap();
        assert_eq!(wizard.state().selected_style.as_deref(), Some("anime"));
        assert_eq!(
            wizard.state().custom_instruction,
            "动漫风格，清新可爱的日系动漫风格"
        );
        assert!(wizard.can_submit());

        wizard.edit_custom_instruction("赛璐璐质感，高对比度");
        assert!(wizard.state().selected_style.is_none());
        assert!(wizard.can_submit());

        // Restoring the seeded text does not restore the selection.
        wizard.edit_custom_instruction("动漫风格，清新可爱的日系动漫风格");
        assert!(wizard.state().selected_style.is_none());
    }

    #[test]
    fn unedited_preset_resolves_to_its_template() {
        let mut wizard = Wizard::new();
        wizard.select_operation(Operation::Creative);
        wizard.add_image(upload("photo.jpg")).unwrap();
        wizard.advance().unwrap();
        wizard.select_style("sticker").unwrap();

        let submission = wizard.submission().unwrap();
        assert_eq!(submission.style_key.as_deref(), Some("sticker"));
        assert_eq!(submission.prompt, "将主体转换为可爱的贴纸，带有白色边框");
        assert_eq!(submission.image.unwrap().name, "photo.jpg");
    }

    #[test]
    fn restart_clears_state_and_back_does_not() {
        let mut wizard = Wizard::new();
        wizard.select_operation(Operation::Style);
        wizard.add_image(upload("photo.png")).unwrap();
        wizard.advance().unwrap();

        assert_eq!(wizard.back(), Step::ProvideInput);
        assert_eq!(wizard.state().images.len(), 1);

        wizard.restart();
        assert_eq!(wizard.step(), Step::ChooseOperation);
        assert!(wizard.state().images.is_empty());
        assert!(wizard.state().operation.is_none());
    }

    #[test]
    fn retry_routes_style_to_step_three_and_others_to_step_two() {
        let mut wizard = Wizard::new();
        wizard.select_operation(Operation::Style);
        wizard.add_image(upload("photo.png")).unwrap();
        wizard.advance().unwrap();
        wizard.select_style("oil").unwrap();
        wizard.open_result(InterpretedResponse {
            kind: ResponseKind::Text,
            body: "no luck".to_string(),
            image_url: None,
            status: ResponseStatus::Error,
            task_id: Some("task_abc".to_string()),
            gen_id: None,
        });
        assert!(wizard.state().result_open);
        assert_eq!(wizard.state().task_id.as_deref(), Some("task_abc"));
        assert_eq!(wizard.close_result_for_retry(), Step::ConfirmStyle);

        let mut wizard = Wizard::new();
        wizard.select_operation(Operation::Generate);
        wizard.set_instruction("a lighthouse at dawn");
        assert_eq!(wizard.retry_target(), Step::ProvideInput);
    }
}
