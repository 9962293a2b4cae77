//! Minimal start/stop control surface for `castpush`: an RTSP URL field and
//! a start/stop button driving `Controller`. The GUI is treated as an
//! external collaborator; this binary is the thinnest possible one.

use std::sync::mpsc::Receiver;
use std::time::Duration;

use castpush::{Controller, PipelineConfig, PipelineEvent};

struct CastPushApp {
    config: PipelineConfig,
    controller: Option<Controller>,
    events: Option<Receiver<PipelineEvent>>,
    status: String,
    last_error: Option<String>,
}

impl Default for CastPushApp {
    fn default() -> Self {
        Self {
            config: PipelineConfig::default(),
            controller: None,
            events: None,
            status: "idle".to_string(),
            last_error: None,
        }
    }
}

impl CastPushApp {
    fn drain_events(&mut self) {
        let Some(rx) = &self.events else { return };
        while let Ok(event) = rx.try_recv() {
            match event {
                PipelineEvent::StateChanged(_from, to) => self.status = to,
                PipelineEvent::Error(message) => self.last_error = Some(message),
                PipelineEvent::Stats(_) => {}
            }
        }
    }
}

impl eframe::App for CastPushApp {
    fn update(&mut self, ctx: &egui::Context, _frame: &mut eframe::Frame) {
        self.drain_events();

        egui::CentralPanel::default().show(ctx, |ui| {
            ui.heading("castpush");

            ui.horizontal(|ui| {
                ui.label("RTSP URL:");
                ui.text_edit_singleline(&mut self.config.rtsp_url);
            });

            let running = self.controller.is_some();
            ui.horizontal(|ui| {
                if ui.add_enabled(!running, egui::Button::new("Start")).clicked() {
                    match Controller::start(self.config.clone()) {
                        Ok((controller, rx)) => {
                            self.controller = Some(controller);
                            self.events = Some(rx);
                            self.last_error = None;
                            self.status = "decoding".to_string();
                        }
                        Err(e) => self.last_error = Some(e.to_string()),
                    }
                }
                if ui.add_enabled(running, egui::Button::new("Stop")).clicked() {
                    if let Some(mut controller) = self.controller.take() {
                        controller.stop();
                    }
                    self.events = None;
                    self.status = "idle".to_string();
                }
            });

            ui.label(format!("state: {}", self.status));
            if let Some(err) = &self.last_error {
                ui.colored_label(egui::Color32::RED, err);
            }
        });

        // Poll for pipeline events even when the user isn't interacting.
        ctx.request_repaint_after(Duration::from_millis(200));
    }
}

fn main() -> eframe::Result<()> {
    env_logger::init();
    let options = eframe::NativeOptions::default();
    eframe::run_native(
        "castpush",
        options,
        Box::new(|_cc| Box::new(CastPushApp::default())),
    )
}
