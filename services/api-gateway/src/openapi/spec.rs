use serde_json::json;

pub fn openapi_spec() -> serde_json::Value {
    let err = json!({ "$ref": "#/components/schemas/Error" });
    let ok = |description: &str| json!({ "200": { "description": description } });
    json!({
        "openapi": "3.0.3",
        "info": {
            "title": "Forecast API Gateway",
            "version": env!("CARGO_PKG_VERSION")
        },
        "paths": {
            "/health": {
                "get": {
                    "responses": {
                        "200": { "description": "ok" },
                        "503": { "description": "store unreachable" }
                    }
                }
            },
            "/metrics": { "get": { "responses": ok("Prometheus text") } },
            "/predictions": {
                "get": {
                    "parameters": [
                        { "name": "instrumentId", "in": "query", "schema": { "type": "string" } },
                        { "name": "userId", "in": "query", "schema": { "type": "string" } },
                        { "name": "evaluated", "in": "query", "schema": { "type": "boolean" } },
                        {
                            "name": "limit",
                            "in": "query",
                            "schema": { "type": "integer", "maximum": 100 }
                        }
                    ],
                    "responses": ok("most recent first")
                },
                "post": {
                    "security": [{ "bearer": [] }],
                    "requestBody": {
                        "content": {
                            "application/json": {
                                "schema": { "$ref": "#/components/schemas/PredictionPayload" }
                            }
                        }
                    },
                    "responses": {
                        "201": { "description": "prediction stored" },
                        "400": {
                            "description": "invalid payload",
                            "content": { "application/json": { "schema": err } }
                        },
                        "401": { "description": "missing or invalid token" },
                        "404": { "description": "unknown instrument" },
                        "409": { "description": "active prediction already exists" },
                        "429": { "description": "per-user rate limit" },
                        "503": { "description": "price unavailable" }
                    }
                }
            },
            "/predictions/stats": {
                "get": { "responses": ok("aggregate stats and top predictors") }
            },
            "/predictions/user/{userId}": {
                "get": { "responses": ok("latest 100 predictions and totals over all of them") }
            },
            "/predictions/{id}": {
                "get": {
                    "responses": {
                        "200": { "description": "prediction" },
                        "404": { "description": "not found" }
                    }
                }
            }
        },
        "components": {
            "securitySchemes": {
                "bearer": { "type": "http", "scheme": "bearer", "bearerFormat": "JWT" }
            },
            "schemas": {
                "Error": { "type": "object", "properties": { "error": { "type": "string" } } },
                "PredictionPayload": {
                    "type": "object",
                    "required": ["instrumentId", "kind", "timeframe"],
                    "properties": {
                        "instrumentId": { "type": "string", "maxLength": 64 },
                        "kind": { "type": "string", "enum": ["price", "direction"] },
                        "targetPrice": { "type": "number", "exclusiveMinimum": 0 },
                        "direction": { "type": "string", "enum": ["up", "down"] },
                        "timeframe": { "type": "string", "enum": ["1h", "1d", "1w", "1m"] },
                        "reasoning": { "type": "string", "maxLength": 1000 }
                    }
                }
            }
        }
    })
}
